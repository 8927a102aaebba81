//! Parameter matrix
//!
//! Evaluates an explicit grid of detector and risk settings against one price
//! series. Every combination gets its own [`Backtester`], so cases run in
//! parallel without sharing state. Results are ranked by total PnL.

use indicatif::ProgressBar;
use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backtest::Backtester;
use crate::config::{Config, DetectorConfig, FibExit, RiskConfig, RsiFilter, TrendFilter};
use crate::PerformanceMetrics;

/// Values to test per parameter. An empty list keeps the base config value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    #[serde(default)]
    pub level1: Vec<u32>,
    #[serde(default)]
    pub level2: Vec<u32>,
    #[serde(default)]
    pub level3: Vec<u32>,
    #[serde(default)]
    pub lookback1: Vec<usize>,
    #[serde(default)]
    pub lookback2: Vec<usize>,
    #[serde(default)]
    pub lookback3: Vec<usize>,
    #[serde(default)]
    pub stop_loss_pct: Vec<f64>,
    #[serde(default)]
    pub take_profit_pct: Vec<f64>,
    /// Enables the Fibonacci exit at each level (base lookback)
    #[serde(default)]
    pub fib_level: Vec<f64>,
    /// `true` enables the RSI filter (base or default thresholds), `false` disables it
    #[serde(default)]
    pub rsi_filter: Vec<bool>,
    #[serde(default)]
    pub trend_filter: Vec<bool>,
}

/// One fully-specified combination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixCase {
    pub detector: DetectorConfig,
    pub risk: RiskConfig,
}

/// Metrics of one evaluated case
#[derive(Debug, Clone)]
pub struct MatrixResult {
    pub case: MatrixCase,
    pub metrics: PerformanceMetrics,
}

fn axis<T: Clone>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

impl ParameterGrid {
    /// Number of raw combinations, before invalid ones are dropped
    pub fn total_combinations(&self) -> usize {
        [
            self.level1.len(),
            self.level2.len(),
            self.level3.len(),
            self.lookback1.len(),
            self.lookback2.len(),
            self.lookback3.len(),
            self.stop_loss_pct.len(),
            self.take_profit_pct.len(),
            self.fib_level.len(),
            self.rsi_filter.len(),
            self.trend_filter.len(),
        ]
        .iter()
        .map(|&n| n.max(1))
        .product()
    }

    /// Cartesian product of the grid over `base`
    ///
    /// Combinations that fail validation (e.g. `level2 <= level1`) are skipped.
    /// Ordering is deterministic: earlier fields vary slowest.
    pub fn expand(&self, base: &Config) -> Vec<MatrixCase> {
        let detectors = self.detector_configs(&base.detector);
        let risks = self.risk_configs(&base.risk);

        let mut cases = Vec::with_capacity(detectors.len() * risks.len());
        for (detector, risk) in iproduct!(detectors, risks.iter().copied()) {
            let case = MatrixCase { detector, risk };
            match detector.validate().and_then(|_| risk.validate()) {
                Ok(()) => cases.push(case),
                Err(e) => tracing::debug!("Skipping combination: {}", e),
            }
        }

        tracing::info!(
            "Expanded grid: {} of {} combinations valid",
            cases.len(),
            self.total_combinations()
        );
        cases
    }

    fn detector_configs(&self, base: &DetectorConfig) -> Vec<DetectorConfig> {
        let levels = iproduct!(
            axis(&self.level1, base.level1),
            axis(&self.level2, base.level2),
            axis(&self.level3, base.level3)
        )
        .collect::<Vec<_>>();
        let lookbacks = iproduct!(
            axis(&self.lookback1, base.lookback1),
            axis(&self.lookback2, base.lookback2),
            axis(&self.lookback3, base.lookback3)
        )
        .collect::<Vec<_>>();

        iproduct!(levels, lookbacks.iter().copied())
            .map(|((level1, level2, level3), (lookback1, lookback2, lookback3))| DetectorConfig {
                level1,
                level2,
                level3,
                lookback1,
                lookback2,
                lookback3,
            })
            .collect()
    }

    fn risk_configs(&self, base: &RiskConfig) -> Vec<RiskConfig> {
        let fib_levels: Vec<Option<f64>> = if self.fib_level.is_empty() {
            vec![base.fib_exit.map(|f| f.level)]
        } else {
            self.fib_level.iter().copied().map(Some).collect()
        };
        let rsi = axis(&self.rsi_filter, base.rsi_filter.is_some());
        let trend = axis(&self.trend_filter, base.trend_filter.is_some());

        let exits = iproduct!(
            axis(&self.stop_loss_pct, base.stop_loss_pct),
            axis(&self.take_profit_pct, base.take_profit_pct),
            fib_levels
        )
        .collect::<Vec<_>>();
        let filters = iproduct!(rsi, trend.iter().copied()).collect::<Vec<_>>();

        iproduct!(exits, filters.iter().copied())
            .map(|((stop_loss_pct, take_profit_pct, fib_level), (use_rsi, use_trend))| {
                RiskConfig {
                    stop_loss_pct,
                    take_profit_pct,
                    fib_exit: fib_level.map(|level| FibExit {
                        level,
                        ..base.fib_exit.unwrap_or_default()
                    }),
                    rsi_filter: use_rsi.then(|| base.rsi_filter.unwrap_or_else(RsiFilter::default)),
                    trend_filter: use_trend
                        .then(|| base.trend_filter.unwrap_or_else(TrendFilter::default)),
                    ..*base
                }
            })
            .collect()
    }
}

fn evaluate(prices: &[f64], case: &MatrixCase) -> Option<MatrixResult> {
    match Backtester::new(case.risk, case.detector) {
        Ok(backtester) => {
            let result = backtester.run(prices);
            Some(MatrixResult {
                case: *case,
                metrics: result.metrics,
            })
        }
        Err(e) => {
            tracing::warn!("Invalid combination skipped: {}", e);
            None
        }
    }
}

/// Sort by total PnL, best first
pub fn sort_results(results: &mut [MatrixResult]) {
    results.sort_by(|a, b| {
        b.metrics
            .total_pnl
            .partial_cmp(&a.metrics.total_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Evaluate every case in parallel
///
/// Takes a reference to the prices so no case clones the series.
pub fn run_matrix(
    prices: &[f64],
    cases: &[MatrixCase],
    progress: Option<&ProgressBar>,
) -> Vec<MatrixResult> {
    tracing::info!("Testing {} parameter combinations", cases.len());

    let mut results: Vec<MatrixResult> = cases
        .par_iter()
        .filter_map(|case| {
            let result = evaluate(prices, case);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            result
        })
        .collect();

    sort_results(&mut results);
    results
}

/// Evaluate every case on the current thread (for debugging)
pub fn run_matrix_sequential(prices: &[f64], cases: &[MatrixCase]) -> Vec<MatrixResult> {
    tracing::info!(
        "Testing {} parameter combinations sequentially",
        cases.len()
    );

    let mut results: Vec<MatrixResult> =
        cases.iter().filter_map(|case| evaluate(prices, case)).collect();
    sort_results(&mut results);
    results
}

/// Compact label for display, e.g. `L=9/12/14 LB=4/3/2 SL=1.20% TP=3.00%`
pub fn format_case(case: &MatrixCase) -> String {
    let d = &case.detector;
    let r = &case.risk;
    let mut label = format!(
        "L={}/{}/{} LB={}/{}/{} SL={:.2}% TP={:.2}%",
        d.level1,
        d.level2,
        d.level3,
        d.lookback1,
        d.lookback2,
        d.lookback3,
        r.stop_loss_pct * 100.0,
        r.take_profit_pct * 100.0
    );
    if let Some(fib) = &r.fib_exit {
        label.push_str(&format!(" FIB={}", fib.level));
    }
    if r.rsi_filter.is_some() {
        label.push_str(" RSI");
    }
    if r.trend_filter.is_some() {
        label.push_str(" EMA");
    }
    label
}
