//! Exhaustion strategy - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Replay a price history through the strategy
//! - signal: Print the detector signal at the last close
//! - matrix: Evaluate a grid of parameter combinations

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "exhaustion-strategy")]
#[command(about = "Exhaustion signal detection and backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Price CSV (overrides config file)
        #[arg(short, long)]
        data: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Write trades.csv and equity.csv to the results directory
        #[arg(long)]
        export: bool,
    },

    /// Show the exhaustion signal at the last close
    Signal {
        /// Price CSV
        #[arg(short, long)]
        data: String,

        /// Path to configuration file (detector defaults if omitted)
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Evaluate every combination of the config's parameter grid
    Matrix {
        /// Path to configuration file with a `grid` section
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Price CSV (overrides config file)
        #[arg(short, long)]
        data: Option<String>,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },
}

/// Console + file layers, or file only (matrix) to keep the console clean for the progress bar
fn build_subscriber(
    env_filter: EnvFilter,
    log_filename: &str,
    file_only: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let console_layer = (!file_only).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
    });

    let file_appender = tracing_appender::rolling::never("logs", log_filename);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    build_subscriber(env_filter, &log_filename, file_only).init();

    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Signal { .. } => ("signal", false),
        Commands::Matrix { .. } => ("matrix", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            capital,
            export,
        } => commands::backtest::run(config, data, capital, export),

        Commands::Signal { data, config } => commands::signal::run(data, config),

        Commands::Matrix {
            config,
            data,
            top,
            sequential,
        } => commands::matrix::run(config, data, top, sequential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["exhaustion-strategy", "matrix", "--top", "5", "--sequential"]);
        assert!(matches!(
            cli.command,
            Commands::Matrix { top: 5, sequential: true, .. }
        ));
    }

    #[test]
    fn test_subscriber_builds_with_and_without_console() {
        std::fs::create_dir_all("logs").unwrap();
        let log_filename = format!("test_{}.log", std::process::id());

        for file_only in [false, true] {
            let subscriber = build_subscriber(EnvFilter::new("info"), &log_filename, file_only);
            tracing::subscriber::with_default(subscriber, || info!(file_only, "subscriber ready"));
        }

        let contents = std::fs::read_to_string(PathBuf::from("logs").join(&log_filename)).unwrap();
        assert_eq!(contents.matches("subscriber ready").count(), 2);
        std::fs::remove_file(PathBuf::from("logs").join(&log_filename)).ok();
    }
}
