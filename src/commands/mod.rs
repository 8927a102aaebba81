pub mod backtest;
pub mod matrix;
pub mod signal;
