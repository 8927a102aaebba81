//! Backtest command implementation

use anyhow::Result;
use exhaustion_strategy::{data, Backtester, Config};
use tracing::info;

pub fn run(
    config_path: String,
    data_override: Option<String>,
    capital_override: Option<f64>,
    export: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(data_file) = data_override {
        info!("Overriding data file to: {}", data_file);
        config.backtest.data_file = data_file;
    }

    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.risk.initial_capital = capital;
    }

    let prices = data::load_closes(&config.backtest.data_file)?;
    let backtester = Backtester::new(config.risk, config.detector)?;

    info!("Running backtest over {} bars...", prices.len());
    let result = backtester.run(&prices);
    let m = result.metrics.rounded();

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", config.risk.initial_capital);
    println!("Final Equity:       {:.2}", m.final_equity);
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Total PnL:          {:.2}", m.total_pnl);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Fees:         {:.2}", m.total_fees);
    println!("Avg Bars Held:      {:.2}", m.avg_bars_held);
    if let (Some(pos), Some(&last)) = (&result.open_position, prices.last()) {
        println!(
            "Open Position:      {} {:.4} @ {:.4} (bar {})",
            pos.side, pos.quantity, pos.entry_price, pos.entry_bar
        );
        println!("Unrealized PnL:     {:.2}", pos.unrealized_pnl(last));
    }
    println!("{}", "=".repeat(60));

    if export {
        let dir = &config.backtest.results_dir;
        let trades_path = data::write_trades_csv(dir, &result.trades)?;
        let equity_path = data::write_equity_csv(dir, &result.equity_curve)?;
        info!(
            "Exported results to {} and {}",
            trades_path.display(),
            equity_path.display()
        );
    }

    info!("Backtest completed successfully");

    Ok(())
}
