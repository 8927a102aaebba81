//! Exhaustion Strategy
//!
//! Exhaustion-count signal detection and a bar-replay backtesting engine for
//! single-instrument close-price series.
//!
//! ```no_run
//! use exhaustion_strategy::{data, Backtester, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/default.json")?;
//!     let prices = data::load_closes(&config.backtest.data_file)?;
//!
//!     let backtester = Backtester::new(config.risk, config.detector)?;
//!     let result = backtester.run(&prices);
//!     println!("Total PnL: {:.2}", result.metrics.total_pnl);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod config;
pub mod data;
pub mod detector;
pub mod indicators;
pub mod matrix;
pub mod risk;
pub mod types;

pub use backtest::{run_backtest, BacktestResult, Backtester};
pub use config::{Config, ConfigError, DetectorConfig, RiskConfig};
pub use detector::ExhaustionDetector;
pub use types::*;
