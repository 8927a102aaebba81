//! Core data types used across the backtesting system

use serde::{Deserialize, Serialize};

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn multiplier(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Exhaustion signal emitted by the detector for a single bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub bull_l1: bool,
    pub bear_l1: bool,
    pub bull_l2: bool,
    pub bear_l2: bool,
    pub bull_l3: bool,
    pub bear_l3: bool,
    pub bull_count: u32,
    pub bear_count: u32,
    pub price: f64,
}

impl Signal {
    /// Signal with no flags set and zero counts
    pub fn empty(price: f64) -> Self {
        Signal {
            bull_l1: false,
            bear_l1: false,
            bull_l2: false,
            bear_l2: false,
            bull_l3: false,
            bear_l3: false,
            bull_count: 0,
            bear_count: 0,
            price,
        }
    }

    pub fn is_bullish_trigger(&self) -> bool {
        self.bull_l3
    }

    pub fn is_bearish_trigger(&self) -> bool {
        self.bear_l3
    }

    /// True if any level flag is set on either side
    pub fn has_flag(&self) -> bool {
        self.bull_l1 || self.bear_l1 || self.bull_l2 || self.bear_l2 || self.bull_l3 || self.bear_l3
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "FIB_TP")]
    FibTakeProfit,
    #[serde(rename = "SIGNAL_REVERSAL")]
    SignalReversal,
}

impl ExitReason {
    pub fn code(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::FibTakeProfit => "FIB_TP",
            ExitReason::SignalReversal => "SIGNAL_REVERSAL",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Open position state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    /// Fill price including slippage
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    /// Dynamic Fibonacci take-profit (longs only)
    pub fib_target: Option<f64>,
    /// Notional debited from free cash at entry
    pub capital_used: f64,
    pub entry_fee: f64,
    pub entry_bar: usize,
}

impl Position {
    /// Mark-to-market value of the position at `price`
    pub fn market_value(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => self.quantity * price,
            Side::Short => self.capital_used + (self.entry_price - price) * self.quantity,
        }
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.quantity * self.side.multiplier()
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Net of entry and exit fees
    pub pnl: f64,
    /// `pnl` relative to the entry notional, in percent
    pub pnl_pct: f64,
    pub fees: f64,
    pub reason: ExitReason,
    pub entry_bar: usize,
    pub exit_bar: usize,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }

    pub fn bars_held(&self) -> usize {
        self.exit_bar - self.entry_bar
    }
}

/// Portfolio statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_fees: f64,
    /// Mean holding period of closed trades, in bars
    pub avg_bars_held: f64,
}

impl PerformanceMetrics {
    /// Copy with every float rounded to two decimals for display
    pub fn rounded(&self) -> Self {
        PerformanceMetrics {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate: round2(self.win_rate),
            total_pnl: round2(self.total_pnl),
            gross_profit: round2(self.gross_profit),
            gross_loss: round2(self.gross_loss),
            profit_factor: round2(self.profit_factor),
            max_drawdown: round2(self.max_drawdown),
            final_equity: round2(self.final_equity),
            total_return: round2(self.total_return),
            avg_win: round2(self.avg_win),
            avg_loss: round2(self.avg_loss),
            largest_win: round2(self.largest_win),
            largest_loss: round2(self.largest_loss),
            total_fees: round2(self.total_fees),
            avg_bars_held: round2(self.avg_bars_held),
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_market_value_mirrors_price_move() {
        let pos = Position {
            side: Side::Short,
            entry_price: 100.0,
            quantity: 2.0,
            stop_loss_price: 101.2,
            take_profit_price: 97.0,
            fib_target: None,
            capital_used: 200.0,
            entry_fee: 0.6,
            entry_bar: 10,
        };

        assert_eq!(pos.market_value(100.0), 200.0);
        assert_eq!(pos.market_value(90.0), 220.0);
        assert_eq!(pos.market_value(110.0), 180.0);
        assert_eq!(pos.unrealized_pnl(90.0), 20.0);
    }

    #[test]
    fn test_has_flag() {
        let mut signal = Signal::empty(100.0);
        signal.bull_count = 8;
        assert!(!signal.has_flag());

        signal.bear_l2 = true;
        assert!(signal.has_flag());
        assert!(!signal.is_bearish_trigger());
    }

    #[test]
    fn test_trade_bars_held() {
        let trade = Trade {
            side: Side::Long,
            entry_price: 100.0,
            exit_price: 103.0,
            quantity: 1.0,
            pnl: 2.4,
            pnl_pct: 2.4,
            fees: 0.6,
            reason: ExitReason::TakeProfit,
            entry_bar: 17,
            exit_bar: 21,
        };
        assert_eq!(trade.bars_held(), 4);
        assert!(trade.is_win());
    }

    #[test]
    fn test_exit_reason_serializes_to_short_code() {
        let json = serde_json::to_string(&ExitReason::FibTakeProfit).unwrap();
        assert_eq!(json, "\"FIB_TP\"");
        assert_eq!(ExitReason::SignalReversal.to_string(), "SIGNAL_REVERSAL");
    }

    #[test]
    fn test_rounded_metrics() {
        let metrics = PerformanceMetrics {
            win_rate: 66.666_666,
            profit_factor: 1.234_9,
            ..Default::default()
        };
        let r = metrics.rounded();
        assert_eq!(r.win_rate, 66.67);
        assert_eq!(r.profit_factor, 1.23);
    }
}
