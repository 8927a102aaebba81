//! Data loading and export
//!
//! Loads close prices from OHLCV-style CSV files and writes backtest results
//! back out as CSV.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::Trade;

/// Column used for closes when the header has no `close` field (OHLCV layout)
const DEFAULT_CLOSE_COLUMN: usize = 4;

/// Load close prices from a CSV file with a header row
///
/// The close column is found by header name (`close`, case-insensitive);
/// otherwise the fifth column is used, matching `datetime,open,high,low,close,volume`.
/// Rows with a missing, unparsable or non-positive close are skipped.
pub fn load_closes(path: impl AsRef<Path>) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let close_idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("close"))
        .unwrap_or(DEFAULT_CLOSE_COLUMN);

    let mut closes = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        match record.get(close_idx).map(|v| v.trim().parse::<f64>()) {
            Some(Ok(close)) if close > 0.0 && close.is_finite() => closes.push(close),
            _ => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid close at row {} in {:?}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default()
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid rows out of {} in {:?}",
            invalid_count,
            invalid_count + closes.len(),
            path.file_name().unwrap_or_default()
        );
    }

    info!("Loaded {} closes from {}", closes.len(), path.display());
    Ok(closes)
}

#[derive(Serialize)]
struct EquityRow {
    bar: usize,
    equity: f64,
}

/// Write the trade ledger to `{dir}/trades.csv`
pub fn write_trades_csv(dir: impl AsRef<Path>, trades: &[Trade]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("trades.csv");

    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for trade in trades {
        writer.serialize(trade).context("Failed to write trade row")?;
    }
    writer.flush()?;

    Ok(path)
}

/// Write the equity curve to `{dir}/equity.csv`
pub fn write_equity_csv(dir: impl AsRef<Path>, equity_curve: &[f64]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("equity.csv");

    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for (bar, &equity) in equity_curve.iter().enumerate() {
        writer.serialize(EquityRow { bar, equity })?;
    }
    writer.flush()?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExitReason, Side};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "exhaustion_strategy_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_closes_by_header() {
        let dir = temp_dir("header");
        let path = dir.join("prices.csv");
        fs::write(&path, "timestamp,Close,volume\n1,1.5,10\n2,abc,10\n3,-1,10\n4,1.7,10\n").unwrap();

        let closes = load_closes(&path).unwrap();
        assert_eq!(closes, vec![1.5, 1.7]);
    }

    #[test]
    fn test_load_closes_ohlcv_fallback() {
        let dir = temp_dir("ohlcv");
        let path = dir.join("prices.csv");
        fs::write(
            &path,
            "dt,o,h,l,c,v\n2024-01-01,1,2,0.5,1.25,100\n2024-01-02,1,2,0.5,1.5,100\n",
        )
        .unwrap();

        let closes = load_closes(&path).unwrap();
        assert_eq!(closes, vec![1.25, 1.5]);
    }

    #[test]
    fn test_load_closes_missing_file() {
        let err = load_closes("/nonexistent/prices.csv").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open CSV file"));
    }

    #[test]
    fn test_export_round_trip_files() {
        let dir = temp_dir("export");
        let trades = vec![Trade {
            side: Side::Short,
            entry_price: 10.0,
            exit_price: 9.0,
            quantity: 2.0,
            pnl: 1.9,
            pnl_pct: 9.5,
            fees: 0.1,
            reason: ExitReason::TakeProfit,
            entry_bar: 5,
            exit_bar: 9,
        }];

        let trades_path = write_trades_csv(&dir, &trades).unwrap();
        let contents = fs::read_to_string(trades_path).unwrap();
        assert!(contents.starts_with("side,entry_price"));
        assert!(contents.contains("SHORT"));
        assert!(contents.contains(",TP,"));

        let equity_path = write_equity_csv(&dir, &[100.0, 101.5]).unwrap();
        let contents = fs::read_to_string(equity_path).unwrap();
        assert_eq!(contents, "bar,equity\n0,100.0\n1,101.5\n");
    }
}
