//! Exhaustion signal detector
//!
//! Counts consecutive closes that keep breaking a lagged reference close in
//! one direction. Three escalating thresholds (levels) each compare against
//! their own lookback distance:
//!
//! ```text
//! count <  level1            price vs close[lookback1]
//! level1 <= count < level2   price vs close[lookback2]
//! level2 <= count < level3   price vs close[lookback3]   (last step snaps to level3)
//! ```
//!
//! Bullish exhaustion counts closes *below* the reference, bearish counts
//! closes *above* it. A failed comparison restarts from `close[lookback1]`.
//! Level 3 is a one-shot trigger: the counters reset right after it fires.

use crate::config::{ConfigError, DetectorConfig};
use crate::Signal;

/// Bars the replay mode skips before feeding the detector
pub const WARMUP_BARS: usize = 4;

/// Counter state carried between bars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    pub bullish_count: u32,
    pub bearish_count: u32,
    pub cycle: u32,
}

impl DetectorState {
    fn bullish(count: u32) -> Self {
        DetectorState {
            bullish_count: count,
            bearish_count: 0,
            cycle: count,
        }
    }

    fn bearish(count: u32) -> Self {
        DetectorState {
            bullish_count: 0,
            bearish_count: count,
            cycle: count,
        }
    }

    /// Fresh cycle started from the reset reference
    fn recheck(price: f64, close_reset: f64) -> Self {
        if price < close_reset {
            DetectorState::bullish(1)
        } else if price > close_reset {
            DetectorState::bearish(1)
        } else {
            DetectorState::default()
        }
    }
}

/// Direction of the count currently being extended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    fn extends(self, price: f64, reference: f64) -> bool {
        match self {
            Direction::Bullish => price < reference,
            Direction::Bearish => price > reference,
        }
    }

    fn state(self, count: u32) -> DetectorState {
        match self {
            Direction::Bullish => DetectorState::bullish(count),
            Direction::Bearish => DetectorState::bearish(count),
        }
    }
}

/// Exhaustion detector
///
/// Usable incrementally ([`update`](Self::update) once per bar) or as a
/// stateless replay over a full history ([`detect_signal`](Self::detect_signal)).
/// Both produce identical signals for identical histories.
#[derive(Debug, Clone)]
pub struct ExhaustionDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl Default for ExhaustionDetector {
    fn default() -> Self {
        ExhaustionDetector {
            config: DetectorConfig::default(),
            state: DetectorState::default(),
        }
    }
}

impl ExhaustionDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ExhaustionDetector {
            config,
            state: DetectorState::default(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::default();
    }

    /// History bars needed before `update` evaluates anything (never below `WARMUP_BARS`)
    pub fn required_history(&self) -> usize {
        self.config.max_lookback().max(WARMUP_BARS)
    }

    /// Feed one close. `history` holds the closes strictly before `price`
    /// (any trailing window at least `required_history()` long).
    pub fn update(&mut self, price: f64, history: &[f64]) -> Signal {
        if history.len() < self.required_history() {
            return Signal::empty(price);
        }

        let cfg = &self.config;
        let close_l1 = history[history.len() - cfg.lookback1];
        let close_l2 = history[history.len() - cfg.lookback2];
        let close_l3 = history[history.len() - cfg.lookback3];
        let close_reset = close_l1;

        let current = self.state;

        self.state = if current.cycle < cfg.level1 {
            if price < close_l1 {
                DetectorState::bullish(current.bullish_count + 1)
            } else if price > close_l1 {
                DetectorState::bearish(current.bearish_count + 1)
            } else {
                DetectorState::recheck(price, close_reset)
            }
        } else if current.bullish_count > 0 {
            self.advance(Direction::Bullish, current.bullish_count, price, close_l2, close_l3, close_reset)
        } else if current.bearish_count > 0 {
            self.advance(Direction::Bearish, current.bearish_count, price, close_l2, close_l3, close_reset)
        } else {
            DetectorState::recheck(price, close_reset)
        };

        let signal = self.signal(price);

        if signal.bull_l3 || signal.bear_l3 {
            tracing::debug!(
                price,
                bullish = signal.bull_l3,
                "Exhaustion level 3 triggered, resetting counts"
            );
            self.reset();
        } else {
            tracing::trace!(
                price,
                bull_count = self.state.bullish_count,
                bear_count = self.state.bearish_count,
                "Exhaustion state updated"
            );
        }

        signal
    }

    /// Extend an established cycle (count >= level1) through the upper brackets
    fn advance(
        &self,
        direction: Direction,
        count: u32,
        price: f64,
        close_l2: f64,
        close_l3: f64,
        close_reset: f64,
    ) -> DetectorState {
        let cfg = &self.config;
        let (reference, next) = if count < cfg.level2 {
            (close_l2, count + 1)
        } else if count < cfg.level3 - 1 {
            (close_l3, count + 1)
        } else if count == cfg.level3 - 1 {
            (close_l3, cfg.level3)
        } else {
            return self.state;
        };

        if direction.extends(price, reference) {
            direction.state(next)
        } else {
            DetectorState::recheck(price, close_reset)
        }
    }

    fn signal(&self, price: f64) -> Signal {
        let cfg = &self.config;
        let bull = self.state.bullish_count;
        let bear = self.state.bearish_count;
        Signal {
            bull_l1: bull == cfg.level1,
            bear_l1: bear == cfg.level1,
            bull_l2: bull == cfg.level2,
            bear_l2: bear == cfg.level2,
            bull_l3: bull == cfg.level3,
            bear_l3: bear == cfg.level3,
            bull_count: bull,
            bear_count: bear,
            price,
        }
    }

    /// Reset, replay every close from the fifth onward and return the signal
    /// at the final close.
    pub fn detect_signal(&mut self, closes: &[f64]) -> Signal {
        self.reset();
        let mut last = Signal::empty(closes.last().copied().unwrap_or(0.0));

        if closes.len() <= WARMUP_BARS {
            return last;
        }

        for i in WARMUP_BARS..closes.len() {
            last = self.update(closes[i], &closes[..i]);
        }

        last
    }
}
