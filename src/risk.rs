//! Risk management
//!
//! Position sizing, slippage and fee modelling, and fixed stop/target levels.
//!
//! # Currency-Agnostic Design
//!
//! All calculations treat money as dimensionless numbers. Results are correct
//! as long as `initial_capital` and the price series share the same currency.
//!
//! Sizing formula:
//! ```text
//! notional = free_cash * risk_per_trade
//! quantity = (notional - notional * fee_pct) / slipped_entry_price
//! ```
//!
//! An optional circuit breaker caps the notional of a single entry and halts
//! new entries after a streak of losing trades.

use thiserror::Error;

use crate::config::RiskConfig;
use crate::Side;

/// Smallest notional the engine will commit to a trade
pub const MIN_NOTIONAL: f64 = 5.0;

/// Why an entry was refused
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum EntryRejection {
    #[error("notional {notional:.2} not above minimum {MIN_NOTIONAL}")]
    BelowMinimum { notional: f64 },

    #[error("notional {notional:.2} exceeds free cash {free_cash:.2}")]
    InsufficientCash { notional: f64, free_cash: f64 },

    #[error("notional {notional:.2} exceeds trade cap {cap:.2}")]
    AboveTradeCap { notional: f64, cap: f64 },
}

/// Sizing and cost model derived from a validated [`RiskConfig`]
#[derive(Debug, Clone, Copy)]
pub struct RiskManager {
    risk_per_trade: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    fee_pct: f64,
    slippage_pct: f64,
    max_trade_notional: Option<f64>,
    max_consecutive_losses: Option<u32>,
}

impl RiskManager {
    pub fn new(config: &RiskConfig) -> Self {
        RiskManager {
            risk_per_trade: config.risk_per_trade,
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            fee_pct: config.fee_pct,
            slippage_pct: config.slippage_pct,
            max_trade_notional: config.max_trade_notional,
            max_consecutive_losses: config.max_consecutive_losses,
        }
    }

    /// Cash to commit for a new entry
    pub fn entry_notional(&self, free_cash: f64) -> Result<f64, EntryRejection> {
        let notional = free_cash * self.risk_per_trade;
        if notional <= MIN_NOTIONAL {
            return Err(EntryRejection::BelowMinimum { notional });
        }
        if notional > free_cash {
            return Err(EntryRejection::InsufficientCash { notional, free_cash });
        }
        if let Some(cap) = self.max_trade_notional {
            if notional > cap {
                return Err(EntryRejection::AboveTradeCap { notional, cap });
            }
        }
        Ok(notional)
    }

    /// True once `consecutive_losses` reaches the configured limit
    pub fn loss_streak_tripped(&self, consecutive_losses: u32) -> bool {
        self.max_consecutive_losses
            .is_some_and(|limit| consecutive_losses >= limit)
    }

    /// Fill price for opening: longs pay up, shorts sell lower
    pub fn entry_price(&self, side: Side, price: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 + self.slippage_pct),
            Side::Short => price * (1.0 - self.slippage_pct),
        }
    }

    /// Fill price for closing: longs sell lower, shorts buy back higher
    pub fn exit_price(&self, side: Side, price: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 - self.slippage_pct),
            Side::Short => price * (1.0 + self.slippage_pct),
        }
    }

    pub fn fee(&self, notional: f64) -> f64 {
        notional * self.fee_pct
    }

    /// Units bought (or sold short) after paying the entry fee out of the notional
    pub fn quantity(&self, notional: f64, entry_price: f64) -> f64 {
        (notional - self.fee(notional)) / entry_price
    }

    pub fn stop_loss(&self, side: Side, entry_price: f64) -> f64 {
        match side {
            Side::Long => entry_price * (1.0 - self.stop_loss_pct),
            Side::Short => entry_price * (1.0 + self.stop_loss_pct),
        }
    }

    pub fn take_profit(&self, side: Side, entry_price: f64) -> f64 {
        match side {
            Side::Long => entry_price * (1.0 + self.take_profit_pct),
            Side::Short => entry_price * (1.0 - self.take_profit_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn manager() -> RiskManager {
        RiskManager::new(&RiskConfig::default())
    }

    #[test]
    fn test_entry_notional_floor() {
        let rm = manager();
        // 2% of 1000 = 20
        assert_relative_eq!(rm.entry_notional(1000.0).unwrap(), 20.0, epsilon = 1e-9);
        // 2% of 250 = 5, not above the floor
        assert!(matches!(
            rm.entry_notional(250.0),
            Err(EntryRejection::BelowMinimum { .. })
        ));
        assert!(rm.entry_notional(0.0).is_err());
    }

    #[test]
    fn test_trade_cap_rejects_oversized_entry() {
        let rm = RiskManager::new(&RiskConfig {
            max_trade_notional: Some(50.0),
            ..Default::default()
        });
        // 2% of 2500 = 50, at the cap
        assert_relative_eq!(rm.entry_notional(2500.0).unwrap(), 50.0, epsilon = 1e-9);
        assert_eq!(
            rm.entry_notional(5000.0),
            Err(EntryRejection::AboveTradeCap {
                notional: 100.0,
                cap: 50.0
            })
        );
    }

    #[test]
    fn test_loss_streak() {
        assert!(!manager().loss_streak_tripped(100));

        let rm = RiskManager::new(&RiskConfig {
            max_consecutive_losses: Some(2),
            ..Default::default()
        });
        assert!(!rm.loss_streak_tripped(1));
        assert!(rm.loss_streak_tripped(2));
        assert!(rm.loss_streak_tripped(3));
    }

    #[test]
    fn test_full_risk_is_allowed() {
        let rm = RiskManager::new(&RiskConfig {
            risk_per_trade: 1.0,
            ..Default::default()
        });
        assert_relative_eq!(rm.entry_notional(100.0).unwrap(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slippage_is_unfavourable() {
        let rm = manager();
        assert!(rm.entry_price(Side::Long, 100.0) > 100.0);
        assert!(rm.entry_price(Side::Short, 100.0) < 100.0);
        assert!(rm.exit_price(Side::Long, 100.0) < 100.0);
        assert!(rm.exit_price(Side::Short, 100.0) > 100.0);
    }

    #[test]
    fn test_levels_mirror_for_shorts() {
        let rm = manager();
        assert_relative_eq!(rm.stop_loss(Side::Long, 100.0), 98.8, epsilon = 1e-9);
        assert_relative_eq!(rm.take_profit(Side::Long, 100.0), 103.0, epsilon = 1e-9);
        assert_relative_eq!(rm.stop_loss(Side::Short, 100.0), 101.2, epsilon = 1e-9);
        assert_relative_eq!(rm.take_profit(Side::Short, 100.0), 97.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quantity_nets_entry_fee() {
        let rm = manager();
        // (20 - 0.06) / 100
        assert_relative_eq!(rm.quantity(20.0, 100.0), 0.1994, epsilon = 1e-9);
    }
}
