//! Property tests for detector and engine invariants.
//!
//! Uses proptest to verify:
//! 1. Replay equivalence: incremental updates match a fresh replay of each prefix
//! 2. Exclusive counts: at most one side counts, bounded by level3
//! 3. Equity curve: one point per bar, capital conserved when flat
//! 4. Metrics bounds: drawdown in [0, 100], profit factor sentinel

use proptest::prelude::*;

use exhaustion_strategy::backtest::calculate_metrics;
use exhaustion_strategy::{Backtester, DetectorConfig, ExhaustionDetector, RiskConfig};

// ── Strategies (proptest) ────────────────────────────────────────────

/// Random walk of positive closes with occasional repeats
fn arb_prices(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-3i32..=3, 0..max_len).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .map(|step| {
                price = (price + step as f64 * 0.5_f64).max(1.0);
                price
            })
            .collect()
    })
}

fn arb_detector_config() -> impl Strategy<Value = DetectorConfig> {
    (1u32..8, 1u32..6, 1u32..6, 1usize..8, 1usize..8, 1usize..8).prop_map(
        |(level1, gap2, gap3, lookback1, lookback2, lookback3)| DetectorConfig {
            level1,
            level2: level1 + gap2,
            level3: level1 + gap2 + gap3,
            lookback1,
            lookback2,
            lookback3,
        },
    )
}

// ── 1. Replay Equivalence ────────────────────────────────────────────

proptest! {
    /// Feeding closes one by one gives the same signal as replaying the prefix.
    #[test]
    fn incremental_matches_replay(
        prices in arb_prices(80),
        config in arb_detector_config(),
    ) {
        let mut incremental = ExhaustionDetector::new(config).unwrap();
        let mut replay = ExhaustionDetector::new(config).unwrap();

        for i in 0..prices.len() {
            let inc = incremental.update(prices[i], &prices[..i]);
            let rep = replay.detect_signal(&prices[..=i]);
            prop_assert_eq!(inc, rep, "bar {}", i);
        }
    }

    /// Only the trailing `required_history` closes influence a signal.
    #[test]
    fn trailing_window_is_sufficient(
        prices in arb_prices(80),
        config in arb_detector_config(),
    ) {
        let mut full = ExhaustionDetector::new(config).unwrap();
        let mut windowed = ExhaustionDetector::new(config).unwrap();
        let window = windowed.required_history();

        for i in 0..prices.len() {
            let a = full.update(prices[i], &prices[..i]);
            let b = windowed.update(prices[i], &prices[i.saturating_sub(window)..i]);
            prop_assert_eq!(a, b);
        }
    }
}

// ── 2. Exclusive Counts ──────────────────────────────────────────────

proptest! {
    #[test]
    fn counts_are_exclusive_and_bounded(
        prices in arb_prices(120),
        config in arb_detector_config(),
    ) {
        let mut detector = ExhaustionDetector::new(config).unwrap();

        for i in 0..prices.len() {
            let signal = detector.update(prices[i], &prices[..i]);
            prop_assert!(signal.bull_count == 0 || signal.bear_count == 0);
            prop_assert!(signal.bull_count <= config.level3);
            prop_assert!(signal.bear_count <= config.level3);

            let state = detector.state();
            prop_assert_eq!(state.cycle, state.bullish_count.max(state.bearish_count));
            if signal.bull_l3 || signal.bear_l3 {
                prop_assert_eq!(state.cycle, 0);
            }
        }
    }
}

// ── 3. Equity Curve ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn equity_curve_has_one_point_per_bar(
        prices in arb_prices(300),
        config in arb_detector_config(),
    ) {
        let result = Backtester::new(RiskConfig::default(), config).unwrap().run(&prices);

        if prices.len() > 4 {
            prop_assert_eq!(result.equity_curve.len(), prices.len());
        } else {
            prop_assert!(result.equity_curve.is_empty());
        }
        prop_assert_eq!(result.metrics.total_trades, result.trades.len());
    }

    /// With no open position at the end, final cash equals capital plus realized PnL.
    #[test]
    fn capital_conserved_when_flat(
        mut prices in arb_prices(300),
        config in arb_detector_config(),
    ) {
        let risk = RiskConfig::default();
        // one extra bar so the last recorded equity reflects any final close
        if let Some(&last) = prices.last() {
            prices.push(last);
        }
        let result = Backtester::new(risk, config).unwrap().run(&prices);

        if result.open_position.is_none() && !result.equity_curve.is_empty() {
            let last_trade_bar = result.trades.last().map_or(0, |t| t.exit_bar);
            prop_assume!(last_trade_bar + 1 < prices.len());

            let pnl: f64 = result.trades.iter().map(|t| t.pnl).sum();
            let final_equity = *result.equity_curve.last().unwrap();
            prop_assert!((final_equity - (risk.initial_capital + pnl)).abs() < 1e-6);
        }
    }
}

// ── 4. Metrics Bounds ────────────────────────────────────────────────

proptest! {
    #[test]
    fn drawdown_within_bounds(
        prices in arb_prices(300),
        config in arb_detector_config(),
    ) {
        let result = Backtester::new(RiskConfig::default(), config).unwrap().run(&prices);
        let m = &result.metrics;

        prop_assert!(m.max_drawdown >= 0.0);
        prop_assert!(m.max_drawdown <= 100.0);
        prop_assert!(m.winning_trades + m.losing_trades <= m.total_trades);
        prop_assert!((0.0..=100.0).contains(&m.win_rate));
    }

    #[test]
    fn profit_factor_sentinel_without_losses(pnls in prop::collection::vec(0.0..50.0_f64, 0..20)) {
        use exhaustion_strategy::{ExitReason, Side, Trade};

        let trades: Vec<Trade> = pnls
            .iter()
            .map(|&pnl| Trade {
                side: Side::Long,
                entry_price: 10.0,
                exit_price: 10.0,
                quantity: 1.0,
                pnl,
                pnl_pct: pnl * 10.0,
                fees: 0.0,
                reason: ExitReason::TakeProfit,
                entry_bar: 0,
                exit_bar: 1,
            })
            .collect();

        let metrics = calculate_metrics(&trades, &[], 1000.0);
        prop_assert_eq!(metrics.profit_factor, 99.0);
        prop_assert_eq!(metrics.losing_trades, 0);
    }
}
