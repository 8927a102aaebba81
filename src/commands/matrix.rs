//! Matrix command implementation with progress tracking

use anyhow::Result;
use exhaustion_strategy::matrix::{self, MatrixResult};
use exhaustion_strategy::{data, Config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

pub fn run(
    config_path: String,
    data_override: Option<String>,
    top: usize,
    sequential: bool,
) -> Result<()> {
    info!("Starting parameter matrix");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(data_file) = data_override {
        config.backtest.data_file = data_file;
    }

    let grid = config.grid.clone().unwrap_or_default();
    let cases = grid.expand(&config);
    if cases.is_empty() {
        anyhow::bail!("No valid parameter combinations in grid");
    }

    let prices = data::load_closes(&config.backtest.data_file)?;
    println!(
        "Loaded {} bars, testing {} combinations{}",
        prices.len(),
        cases.len(),
        if sequential { " sequentially" } else { "" }
    );

    let results: Vec<MatrixResult> = if sequential {
        matrix::run_matrix_sequential(&prices, &cases)
    } else {
        let pb = ProgressBar::new(cases.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
                .progress_chars("█░ "),
        );
        let results = matrix::run_matrix(&prices, &cases, Some(&pb));
        pb.finish();
        println!();
        results
    };

    let display_count = top.min(results.len());

    println!("\n{}", "=".repeat(110));
    println!("TOP {} COMBINATIONS (sorted by total PnL)", display_count);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>10} {:>9} {:>8} {:>8} {:>7} {:>6} | Parameters",
        "Rank", "PnL", "Return%", "MaxDD%", "WinR%", "PF", "Trades"
    );
    println!("{}", "-".repeat(110));

    for (i, result) in results.iter().take(top).enumerate() {
        let m = result.metrics.rounded();
        println!(
            "{:<4} {:>10.2} {:>9.2} {:>8.2} {:>8.2} {:>7.2} {:>6} | {}",
            i + 1,
            m.total_pnl,
            m.total_return,
            m.max_drawdown,
            m.win_rate,
            m.profit_factor,
            m.total_trades,
            matrix::format_case(&result.case)
        );
    }
    println!("{}", "=".repeat(110));

    info!("Matrix completed: {} results", results.len());

    Ok(())
}
