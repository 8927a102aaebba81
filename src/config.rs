//! Configuration management
//!
//! Handles loading, defaulting and validation of the JSON configuration.
//! Every config is validated before a run starts; the engine itself never
//! fails on configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::matrix::ParameterGrid;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("levels must be strictly increasing: level1={level1}, level2={level2}, level3={level3}")]
    NonMonotonicLevels { level1: u32, level2: u32, level3: u32 },

    #[error("level1 must be >= 1")]
    ZeroLevel,

    #[error("{name} must be >= 1")]
    ZeroLookback { name: &'static str },

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be in [0, 1), got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("risk_per_trade must be in (0, 1], got {0}")]
    RiskPerTrade(f64),

    #[error("rsi period must be >= 2, got {0}")]
    RsiPeriod(usize),

    #[error("rsi thresholds must satisfy 0 <= oversold < overbought <= 100: oversold={oversold}, overbought={overbought}")]
    RsiThresholds { oversold: f64, overbought: f64 },

    #[error("ema period must be >= 1")]
    EmaPeriod,

    #[error("fibonacci level must be in (0, 1], got {0}")]
    FibLevel(f64),

    #[error("fibonacci lookback must be >= 1")]
    FibLookback,

    #[error("max_consecutive_losses must be >= 1")]
    ZeroLossLimit,
}

// =============================================================================
// Detector
// =============================================================================

/// Exhaustion detector thresholds and lookbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_level1")]
    pub level1: u32,
    #[serde(default = "default_level2")]
    pub level2: u32,
    #[serde(default = "default_level3")]
    pub level3: u32,
    #[serde(default = "default_lookback1")]
    pub lookback1: usize,
    #[serde(default = "default_lookback2")]
    pub lookback2: usize,
    #[serde(default = "default_lookback3")]
    pub lookback3: usize,
}

fn default_level1() -> u32 { 9 }
fn default_level2() -> u32 { 12 }
fn default_level3() -> u32 { 14 }
fn default_lookback1() -> usize { 4 }
fn default_lookback2() -> usize { 3 }
fn default_lookback3() -> usize { 2 }

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            level1: default_level1(),
            level2: default_level2(),
            level3: default_level3(),
            lookback1: default_lookback1(),
            lookback2: default_lookback2(),
            lookback3: default_lookback3(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level1 == 0 {
            return Err(ConfigError::ZeroLevel);
        }
        if !(self.level1 < self.level2 && self.level2 < self.level3) {
            return Err(ConfigError::NonMonotonicLevels {
                level1: self.level1,
                level2: self.level2,
                level3: self.level3,
            });
        }
        for (name, lookback) in [
            ("lookback1", self.lookback1),
            ("lookback2", self.lookback2),
            ("lookback3", self.lookback3),
        ] {
            if lookback == 0 {
                return Err(ConfigError::ZeroLookback { name });
            }
        }
        Ok(())
    }

    /// Longest lookback across the three brackets
    pub fn max_lookback(&self) -> usize {
        self.lookback1.max(self.lookback2).max(self.lookback3)
    }

    /// Same lookback for all three brackets
    pub fn with_uniform_lookback(mut self, lookback: usize) -> Self {
        self.lookback1 = lookback;
        self.lookback2 = lookback;
        self.lookback3 = lookback;
        self
    }
}

// =============================================================================
// Risk
// =============================================================================

/// RSI entry filter: longs need RSI <= oversold, shorts RSI >= overbought
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiFilter {
    #[serde(default = "default_rsi_period")]
    pub period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub overbought: f64,
}

fn default_rsi_period() -> usize { 14 }
fn default_rsi_oversold() -> f64 { 30.0 }
fn default_rsi_overbought() -> f64 { 70.0 }

impl Default for RsiFilter {
    fn default() -> Self {
        RsiFilter {
            period: default_rsi_period(),
            oversold: default_rsi_oversold(),
            overbought: default_rsi_overbought(),
        }
    }
}

/// EMA trend filter: longs need price above EMA, shorts below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendFilter {
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
}

fn default_ema_period() -> usize { 200 }

impl Default for TrendFilter {
    fn default() -> Self {
        TrendFilter {
            ema_period: default_ema_period(),
        }
    }
}

/// Dynamic Fibonacci take-profit for longs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibExit {
    /// Retracement fraction of the swing range (0.5 = midpoint)
    #[serde(default = "default_fib_level")]
    pub level: f64,
    /// Bars in the swing window, entry bar included
    #[serde(default = "default_fib_lookback")]
    pub lookback: usize,
}

fn default_fib_level() -> f64 { 0.5 }
fn default_fib_lookback() -> usize { 50 }

impl Default for FibExit {
    fn default() -> Self {
        FibExit {
            level: default_fib_level(),
            lookback: default_fib_lookback(),
        }
    }
}

/// Position sizing, transaction costs and exit rules
///
/// All monetary values share the currency of the price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Fraction of free cash committed per entry
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
    #[serde(default = "default_fee_pct")]
    pub fee_pct: f64,
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_filter: Option<RsiFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_filter: Option<TrendFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fib_exit: Option<FibExit>,
    /// Entries whose notional exceeds this cap are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trade_notional: Option<f64>,
    /// Stop opening positions after this many losing trades in a row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_losses: Option<u32>,
}

fn default_initial_capital() -> f64 { 1000.0 }
fn default_stop_loss_pct() -> f64 { 0.012 }
fn default_take_profit_pct() -> f64 { 0.03 }
fn default_risk_per_trade() -> f64 { 0.02 }
fn default_fee_pct() -> f64 { 0.003 }
fn default_slippage_pct() -> f64 { 0.005 }

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            initial_capital: default_initial_capital(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            risk_per_trade: default_risk_per_trade(),
            fee_pct: default_fee_pct(),
            slippage_pct: default_slippage_pct(),
            rsi_filter: None,
            trend_filter: None,
            fib_exit: None,
            max_trade_notional: None,
            max_consecutive_losses: None,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("initial_capital", self.initial_capital),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            // written as !(x > 0) so NaN is rejected too
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(ConfigError::RiskPerTrade(self.risk_per_trade));
        }
        for (name, value) in [
            ("fee_pct", self.fee_pct),
            ("slippage_pct", self.slippage_pct),
            ("stop_loss_pct", self.stop_loss_pct),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        if let Some(rsi) = &self.rsi_filter {
            if rsi.period < 2 {
                return Err(ConfigError::RsiPeriod(rsi.period));
            }
            if !(rsi.oversold >= 0.0 && rsi.oversold < rsi.overbought && rsi.overbought <= 100.0) {
                return Err(ConfigError::RsiThresholds {
                    oversold: rsi.oversold,
                    overbought: rsi.overbought,
                });
            }
        }
        if let Some(trend) = &self.trend_filter {
            if trend.ema_period == 0 {
                return Err(ConfigError::EmaPeriod);
            }
        }
        if let Some(fib) = &self.fib_exit {
            if !(fib.level > 0.0 && fib.level <= 1.0) {
                return Err(ConfigError::FibLevel(fib.level));
            }
            if fib.lookback == 0 {
                return Err(ConfigError::FibLookback);
            }
        }
        if let Some(value) = self.max_trade_notional {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive {
                    name: "max_trade_notional",
                    value,
                });
            }
        }
        if self.max_consecutive_losses == Some(0) {
            return Err(ConfigError::ZeroLossLimit);
        }
        Ok(())
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Where the CLI finds price data and writes results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

fn default_data_file() -> String {
    "data/ADAUSDT_1m.csv".to_string()
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings {
            data_file: default_data_file(),
            results_dir: default_results_dir(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Parameter matrix (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<ParameterGrid>,
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&contents)?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.risk.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
        let d = DetectorConfig::default();
        assert_eq!((d.level1, d.level2, d.level3), (9, 12, 14));
        assert_eq!((d.lookback1, d.lookback2, d.lookback3), (4, 3, 2));
        assert_eq!(d.max_lookback(), 4);
    }

    #[test]
    fn test_non_monotonic_levels_rejected() {
        let cfg = DetectorConfig {
            level2: 9,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonMonotonicLevels {
                level1: 9,
                level2: 9,
                level3: 14
            })
        );
    }

    #[test]
    fn test_zero_lookback_rejected() {
        let cfg = DetectorConfig {
            lookback2: 0,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroLookback { name: "lookback2" })
        );
    }

    #[test]
    fn test_risk_validation() {
        let bad_sl = RiskConfig {
            stop_loss_pct: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_sl.validate(),
            Err(ConfigError::NonPositive { name: "stop_loss_pct", .. })
        ));

        let bad_fee = RiskConfig {
            fee_pct: -0.001,
            ..Default::default()
        };
        assert!(matches!(
            bad_fee.validate(),
            Err(ConfigError::OutOfUnitRange { name: "fee_pct", .. })
        ));

        let bad_risk = RiskConfig {
            risk_per_trade: 1.5,
            ..Default::default()
        };
        assert_eq!(bad_risk.validate(), Err(ConfigError::RiskPerTrade(1.5)));

        let bad_rsi = RiskConfig {
            rsi_filter: Some(RsiFilter {
                oversold: 70.0,
                overbought: 30.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            bad_rsi.validate(),
            Err(ConfigError::RsiThresholds { .. })
        ));

        let bad_fib = RiskConfig {
            fib_exit: Some(FibExit {
                level: 1.5,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(bad_fib.validate(), Err(ConfigError::FibLevel(1.5)));

        let bad_cap = RiskConfig {
            max_trade_notional: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            bad_cap.validate(),
            Err(ConfigError::NonPositive { name: "max_trade_notional", .. })
        ));

        let bad_streak = RiskConfig {
            max_consecutive_losses: Some(0),
            ..Default::default()
        };
        assert_eq!(bad_streak.validate(), Err(ConfigError::ZeroLossLimit));
    }

    #[test]
    fn test_circuit_breaker_off_by_default() {
        let json = r#"{ "risk": { "max_consecutive_losses": 3 } }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.risk.max_consecutive_losses, Some(3));
        assert_eq!(config.risk.max_trade_notional, None);
        assert_eq!(RiskConfig::default().max_consecutive_losses, None);

        let serialized = serde_json::to_string(&RiskConfig::default()).unwrap();
        assert!(!serialized.contains("max_trade_notional"));
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "detector": { "level3": 18 },
            "risk": { "stop_loss_pct": 0.015, "fib_exit": { "level": 0.618 } }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.detector.level1, 9);
        assert_eq!(config.detector.level3, 18);
        assert_eq!(config.risk.stop_loss_pct, 0.015);
        assert_eq!(config.risk.take_profit_pct, 0.03);
        let fib = config.risk.fib_exit.unwrap();
        assert_eq!(fib.level, 0.618);
        assert_eq!(fib.lookback, 50);
        assert!(config.risk.rsi_filter.is_none());
    }

    #[test]
    fn test_from_json_rejects_invalid_levels() {
        let json = r#"{ "detector": { "level1": 12, "level2": 9 } }"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(format!("{:#}", err).contains("strictly increasing"));
    }
}
