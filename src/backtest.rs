//! Backtesting engine
//!
//! Bar-replay simulation of the exhaustion strategy on a single close-price
//! series. One position at most, no pyramiding, no same-bar flips.
//!
//! Each bar:
//! 1. Record equity (free cash + market value of the open position)
//! 2. Check exits in priority order: stop loss, take profit, Fibonacci target
//! 3. After the warm-up bars, feed the detector a trailing window
//! 4. Gate level-3 signals through the optional RSI / EMA filters
//! 5. Open, or close on reversal
//!
//! Indicators are computed once over the whole series before the replay.

use crate::config::{ConfigError, DetectorConfig, RiskConfig};
use crate::detector::{ExhaustionDetector, WARMUP_BARS};
use crate::indicators::{ema, fib_target, rsi, swing_range};
use crate::risk::{EntryRejection, RiskManager};
use crate::{ExitReason, PerformanceMetrics, Position, Side, Signal, Trade};

/// Minimum trailing window handed to the detector on each bar
pub const HISTORY_WINDOW: usize = 10;

/// Profit factor reported when the ledger has no losing trades
pub const PROFIT_FACTOR_NO_LOSSES: f64 = 99.0;

/// Outcome of a single run
#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    /// One value per input bar
    pub equity_curve: Vec<f64>,
    pub metrics: PerformanceMetrics,
    /// Position still open after the last bar
    pub open_position: Option<Position>,
}

/// Indicator arrays precomputed for the whole series, indexed by bar
#[derive(Debug, Clone, Default)]
struct IndicatorSet {
    rsi: Option<Vec<Option<f64>>>,
    ema: Option<Vec<Option<f64>>>,
}

impl IndicatorSet {
    fn compute(prices: &[f64], config: &RiskConfig) -> Self {
        IndicatorSet {
            rsi: config.rsi_filter.map(|f| rsi(prices, f.period)),
            ema: config.trend_filter.map(|f| ema(prices, f.ema_period)),
        }
    }
}

/// Mutable state owned by one run
struct EngineState {
    free_cash: f64,
    position: Option<Position>,
    equity_curve: Vec<f64>,
    trades: Vec<Trade>,
    /// Losing trades since the last non-losing one
    consecutive_losses: u32,
}

impl EngineState {
    fn new(initial_capital: f64, bars: usize) -> Self {
        EngineState {
            free_cash: initial_capital,
            position: None,
            equity_curve: Vec::with_capacity(bars),
            trades: Vec::new(),
            consecutive_losses: 0,
        }
    }

    fn equity(&self, price: f64) -> f64 {
        self.free_cash
            + self
                .position
                .as_ref()
                .map_or(0.0, |pos| pos.market_value(price))
    }
}

/// Backtest engine
///
/// Configuration is validated once in [`Backtester::new`]; [`Backtester::run`]
/// never fails and can be called repeatedly, each call owning fresh state.
#[derive(Debug, Clone)]
pub struct Backtester {
    risk: RiskConfig,
    detector: ExhaustionDetector,
    risk_manager: RiskManager,
}

impl Backtester {
    pub fn new(risk: RiskConfig, detector: DetectorConfig) -> Result<Self, ConfigError> {
        risk.validate()?;
        let detector = ExhaustionDetector::new(detector)?;

        Ok(Backtester {
            risk_manager: RiskManager::new(&risk),
            risk,
            detector,
        })
    }

    pub fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    pub fn detector_config(&self) -> &DetectorConfig {
        self.detector.config()
    }

    /// Replay `prices` bar by bar
    pub fn run(&self, prices: &[f64]) -> BacktestResult {
        if prices.len() <= WARMUP_BARS {
            tracing::debug!(bars = prices.len(), "Not enough bars for a backtest");
            return BacktestResult {
                metrics: calculate_metrics(&[], &[], self.risk.initial_capital),
                ..Default::default()
            };
        }

        let mut detector = self.detector.clone();
        detector.reset();
        let indicators = IndicatorSet::compute(prices, &self.risk);
        // at least HISTORY_WINDOW bars; lookbacks longer than the detector's
        // floor of 4 need a longer window to stay window-independent
        let window = HISTORY_WINDOW.max(detector.required_history());
        let mut state = EngineState::new(self.risk.initial_capital, prices.len());

        for (i, &price) in prices.iter().enumerate() {
            state.equity_curve.push(state.equity(price));

            if let Some(reason) = state.position.as_ref().and_then(|pos| exit_reason(pos, price)) {
                self.close_position(&mut state, price, i, reason);
            }

            if i < WARMUP_BARS {
                continue;
            }

            let history = &prices[i.saturating_sub(window)..i];
            let signal = detector.update(price, history);

            self.on_signal(&mut state, &signal, &indicators, prices, i);
        }

        let metrics = calculate_metrics(&state.trades, &state.equity_curve, self.risk.initial_capital);

        tracing::info!(
            bars = prices.len(),
            trades = metrics.total_trades,
            total_pnl = format!("{:.2}", metrics.total_pnl),
            final_equity = format!("{:.2}", metrics.final_equity),
            "Backtest complete"
        );

        BacktestResult {
            trades: state.trades,
            equity_curve: state.equity_curve,
            metrics,
            open_position: state.position,
        }
    }

    fn on_signal(
        &self,
        state: &mut EngineState,
        signal: &Signal,
        indicators: &IndicatorSet,
        prices: &[f64],
        i: usize,
    ) {
        let price = prices[i];

        if signal.is_bullish_trigger() && self.filters_permit(Side::Long, indicators, price, i) {
            match state.position.as_ref().map(|p| p.side) {
                None => self.open_position(state, Side::Long, prices, i),
                Some(Side::Short) => {
                    self.close_position(state, price, i, ExitReason::SignalReversal)
                }
                Some(Side::Long) => {}
            }
        } else if signal.is_bearish_trigger()
            && self.filters_permit(Side::Short, indicators, price, i)
        {
            match state.position.as_ref().map(|p| p.side) {
                None => self.open_position(state, Side::Short, prices, i),
                Some(Side::Long) => {
                    self.close_position(state, price, i, ExitReason::SignalReversal)
                }
                Some(Side::Short) => {}
            }
        }
    }

    /// RSI and EMA gates; an indicator without a value yet blocks the signal
    fn filters_permit(&self, side: Side, indicators: &IndicatorSet, price: f64, i: usize) -> bool {
        if let (Some(filter), Some(values)) = (&self.risk.rsi_filter, &indicators.rsi) {
            let permitted = values[i].is_some_and(|value| match side {
                Side::Long => value <= filter.oversold,
                Side::Short => value >= filter.overbought,
            });
            if !permitted {
                tracing::debug!(bar = i, ?side, rsi = ?values[i], "Signal suppressed by RSI filter");
                return false;
            }
        }

        if let Some(values) = &indicators.ema {
            let permitted = values[i].is_some_and(|value| match side {
                Side::Long => price > value,
                Side::Short => price < value,
            });
            if !permitted {
                tracing::debug!(bar = i, ?side, ema = ?values[i], "Signal suppressed by trend filter");
                return false;
            }
        }

        true
    }

    fn open_position(&self, state: &mut EngineState, side: Side, prices: &[f64], i: usize) {
        let rm = &self.risk_manager;
        let price = prices[i];

        if rm.loss_streak_tripped(state.consecutive_losses) {
            tracing::info!(
                bar = i,
                %side,
                losses = state.consecutive_losses,
                "Entry blocked: consecutive loss limit reached"
            );
            return;
        }

        let notional = match rm.entry_notional(state.free_cash) {
            Ok(notional) => notional,
            Err(rejection @ EntryRejection::AboveTradeCap { .. }) => {
                tracing::info!(bar = i, %side, "Entry blocked: {}", rejection);
                return;
            }
            Err(rejection) => {
                tracing::debug!(bar = i, %side, "Entry rejected: {}", rejection);
                return;
            }
        };

        let entry_price = rm.entry_price(side, price);
        let entry_fee = rm.fee(notional);
        let quantity = rm.quantity(notional, entry_price);

        let fib_target = match (side, &self.risk.fib_exit) {
            (Side::Long, Some(fib)) => swing_range(prices, i, fib.lookback)
                .map(|(low, high)| fib_target(low, high, fib.level))
                .filter(|&target| target > entry_price),
            _ => None,
        };

        state.free_cash -= notional;

        let position = Position {
            side,
            entry_price,
            quantity,
            stop_loss_price: rm.stop_loss(side, entry_price),
            take_profit_price: rm.take_profit(side, entry_price),
            fib_target,
            capital_used: notional,
            entry_fee,
            entry_bar: i,
        };

        tracing::info!(
            bar = i,
            %side,
            price = format!("{:.4}", entry_price),
            qty = format!("{:.4}", quantity),
            sl = format!("{:.4}", position.stop_loss_price),
            tp = format!("{:.4}", position.take_profit_price),
            fib = ?position.fib_target,
            "Position opened"
        );

        state.position = Some(position);
    }

    fn close_position(&self, state: &mut EngineState, price: f64, i: usize, reason: ExitReason) {
        let Some(pos) = state.position.take() else {
            return;
        };
        let rm = &self.risk_manager;

        let exit_price = rm.exit_price(pos.side, price);
        let gross = (exit_price - pos.entry_price) * pos.quantity * pos.side.multiplier();
        let exit_fee = rm.fee(exit_price * pos.quantity);
        let pnl = gross - pos.entry_fee - exit_fee;

        state.free_cash += pos.capital_used + pnl;
        if pnl < 0.0 {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        let trade = Trade {
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.quantity,
            pnl,
            pnl_pct: pnl / pos.capital_used * 100.0,
            fees: pos.entry_fee + exit_fee,
            reason,
            entry_bar: pos.entry_bar,
            exit_bar: i,
        };

        tracing::info!(
            bar = i,
            side = %trade.side,
            price = format!("{:.4}", exit_price),
            %reason,
            pnl = format!("{:.2}", trade.pnl),
            "Position closed"
        );

        state.trades.push(trade);
    }
}

/// First exit condition met by `pos` at `price`, in priority order
fn exit_reason(pos: &Position, price: f64) -> Option<ExitReason> {
    let (stop_hit, target_hit) = match pos.side {
        Side::Long => (price <= pos.stop_loss_price, price >= pos.take_profit_price),
        Side::Short => (price >= pos.stop_loss_price, price <= pos.take_profit_price),
    };

    if stop_hit {
        Some(ExitReason::StopLoss)
    } else if target_hit {
        Some(ExitReason::TakeProfit)
    } else if pos.fib_target.is_some_and(|target| price >= target) {
        Some(ExitReason::FibTakeProfit)
    } else {
        None
    }
}

/// Validate both configs and run a single backtest
pub fn run_backtest(
    prices: &[f64],
    risk: &RiskConfig,
    detector: &DetectorConfig,
) -> Result<BacktestResult, ConfigError> {
    Ok(Backtester::new(*risk, *detector)?.run(prices))
}

/// Aggregate the trade ledger and equity curve
pub fn calculate_metrics(
    trades: &[Trade],
    equity_curve: &[f64],
    initial_capital: f64,
) -> PerformanceMetrics {
    let winning: Vec<f64> = trades.iter().filter(|t| t.is_win()).map(|t| t.pnl).collect();
    let losing: Vec<f64> = trades.iter().filter(|t| t.is_loss()).map(|t| t.pnl).collect();

    let total_trades = trades.len();
    let win_rate = if total_trades > 0 {
        winning.len() as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let gross_profit: f64 = winning.iter().sum();
    let gross_loss: f64 = losing.iter().map(|pnl| pnl.abs()).sum();

    let profit_factor = if losing.is_empty() {
        PROFIT_FACTOR_NO_LOSSES
    } else {
        gross_profit / gross_loss
    };

    let avg_win = if winning.is_empty() {
        0.0
    } else {
        gross_profit / winning.len() as f64
    };
    let avg_loss = if losing.is_empty() {
        0.0
    } else {
        gross_loss / losing.len() as f64
    };

    let largest_win = winning.iter().copied().fold(0.0, f64::max);
    let largest_loss = losing.iter().copied().fold(0.0, f64::min);

    let avg_bars_held = if total_trades > 0 {
        trades.iter().map(|t| t.bars_held() as f64).sum::<f64>() / total_trades as f64
    } else {
        0.0
    };

    let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
    let total_return = (final_equity - initial_capital) / initial_capital * 100.0;

    PerformanceMetrics {
        total_trades,
        winning_trades: winning.len(),
        losing_trades: losing.len(),
        win_rate,
        total_pnl,
        gross_profit,
        gross_loss,
        profit_factor,
        max_drawdown: max_drawdown(equity_curve),
        final_equity,
        total_return,
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        total_fees: trades.iter().map(|t| t.fees).sum(),
        avg_bars_held,
    }
}

/// Largest peak-to-trough decline of the curve, in percent of the running peak
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0;

    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak <= 0.0 {
            continue;
        }
        let dd = (peak - equity) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }

    max_dd
}
