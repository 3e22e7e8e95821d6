//! Per-strategy rate and backoff governor
//!
//! Every strategy call goes through [`RateGovernor::await_turn`] first. The
//! governor keeps calls to one strategy at least `min_interval` apart and, after
//! a rate-limited outcome, holds the strategy back for an exponentially growing
//! penalty capped at `penalty_cap`. State is process-local.

use crate::{
    constants::{MIN_CALL_INTERVAL_MS, PENALTY_BASE_MS, PENALTY_CAP_MS},
    error::ErrorKind,
    types::{StrategyId, StrategyOutcome},
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Pacing and backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    /// Minimum spacing between two calls to the same strategy
    pub min_interval: Duration,
    /// Penalty after the first rate-limited outcome in a row
    pub penalty_base: Duration,
    /// Upper bound for a single penalty
    pub penalty_cap: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(MIN_CALL_INTERVAL_MS),
            penalty_base: Duration::from_millis(PENALTY_BASE_MS),
            penalty_cap: Duration::from_millis(PENALTY_CAP_MS),
        }
    }
}

impl GovernorConfig {
    /// Penalty for the `streak`-th rate-limited outcome in a row
    pub fn penalty_for(&self, streak: u32) -> Duration {
        let factor = 1u32
            .checked_shl(streak.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.penalty_base.saturating_mul(factor).min(self.penalty_cap)
    }
}

#[derive(Debug, Default)]
struct StrategySlot {
    /// Start of the most recently granted turn
    last_turn: Option<Instant>,
    penalty_until: Option<Instant>,
    rate_limit_streak: u32,
}

/// Spaces and backs off calls per strategy
#[derive(Debug, Default)]
pub struct RateGovernor {
    config: GovernorConfig,
    slots: Mutex<HashMap<StrategyId, StrategySlot>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Waits until `strategy` may be called
    ///
    /// The turn is reserved before sleeping, so concurrent callers queue up
    /// behind each other instead of waking at the same instant.
    pub async fn await_turn(&self, strategy: StrategyId) {
        let now = Instant::now();
        let turn = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(strategy).or_default();

            let mut turn = now;
            if let Some(last) = slot.last_turn {
                turn = turn.max(last + self.config.min_interval);
            }
            if let Some(penalty_until) = slot.penalty_until {
                turn = turn.max(penalty_until);
            }
            slot.last_turn = Some(turn);
            turn
        };

        if turn > now {
            tracing::debug!(
                strategy = %strategy,
                wait_ms = (turn - now).as_millis() as u64,
                "Waiting for strategy turn"
            );
            sleep_until(turn).await;
        }
    }

    /// Updates penalty state from the outcome of a call
    pub async fn record_outcome(&self, outcome: &StrategyOutcome) {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(outcome.strategy_id).or_default();

        if outcome.error_kind == Some(ErrorKind::RateLimited) {
            slot.rate_limit_streak = slot.rate_limit_streak.saturating_add(1);
            let penalty = self.config.penalty_for(slot.rate_limit_streak);
            slot.penalty_until = Some(Instant::now() + penalty);

            tracing::warn!(
                strategy = %outcome.strategy_id,
                streak = slot.rate_limit_streak,
                penalty_ms = penalty.as_millis() as u64,
                "Strategy rate limited, backing off"
            );
        } else {
            slot.rate_limit_streak = 0;
        }
    }

    /// Time left on the strategy's current penalty
    pub async fn penalty_remaining(&self, strategy: StrategyId) -> Duration {
        let slots = self.slots.lock().await;
        slots
            .get(&strategy)
            .and_then(|slot| slot.penalty_until)
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Strategies currently serving a penalty, with the time left
    pub async fn active_penalties(&self) -> Vec<(StrategyId, Duration)> {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        let mut penalties: Vec<_> = slots
            .iter()
            .filter_map(|(id, slot)| {
                let left = slot.penalty_until?.saturating_duration_since(now);
                (!left.is_zero()).then_some((*id, left))
            })
            .collect();
        penalties.sort_by_key(|(id, _)| *id);
        penalties
    }
}
