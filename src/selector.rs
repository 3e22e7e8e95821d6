//! Strategy selector
//!
//! Walks the strategies a subject allows, one at a time, until one of them
//! produces a quote. Each attempt waits for its governor turn, borrows a token
//! when the strategy needs one and feeds its outcome back into the governor
//! and the metrics.

use crate::{
    auth::AuthTokenManager,
    catalog::Subject,
    clock::{Clock, SystemClock},
    constants::{PACING_MAX_MS, PACING_MIN_MS},
    error::{ErrorKind, StrategyFailure},
    governor::RateGovernor,
    metrics::MetricsRegistry,
    strategy::TransportStrategy,
    types::{PriceQuote, StrategyOutcome},
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Order and pacing of strategy attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    /// Shuffle the eligible strategies on every call
    pub shuffle: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            pacing_min: Duration::from_millis(PACING_MIN_MS),
            pacing_max: Duration::from_millis(PACING_MAX_MS),
            shuffle: true,
        }
    }
}

/// Every eligible strategy failed
#[derive(Debug, Clone, Error)]
#[error("all {} strategies failed, most specific error: {kind}", attempts.len())]
pub struct SelectorFailure {
    /// Most specific kind among the failures
    pub kind: ErrorKind,
    pub attempts: Vec<StrategyOutcome>,
}

pub struct StrategySelector {
    strategies: Vec<Arc<dyn TransportStrategy>>,
    governor: Arc<RateGovernor>,
    auth: Option<Arc<AuthTokenManager>>,
    metrics: Arc<MetricsRegistry>,
    clock: Arc<dyn Clock>,
    config: SelectorConfig,
}

impl StrategySelector {
    /// Creates a selector trying `strategies` in the given preference order
    pub fn new(
        strategies: Vec<Arc<dyn TransportStrategy>>,
        governor: Arc<RateGovernor>,
        metrics: Arc<MetricsRegistry>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            strategies,
            governor,
            auth: None,
            metrics,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Supplies tokens to strategies that require auth
    pub fn with_auth(mut self, auth: Arc<AuthTokenManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Clock used to timestamp the quotes strategies return
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn strategies(&self) -> &[Arc<dyn TransportStrategy>] {
        &self.strategies
    }

    /// Tries eligible strategies in turn until one returns a quote
    pub async fn resolve(&self, subject: &Subject) -> Result<PriceQuote, SelectorFailure> {
        let plan = self.plan(subject);
        if plan.is_empty() {
            tracing::warn!(subject = subject.name(), "No strategy is allowed for subject");
            return Err(SelectorFailure {
                kind: ErrorKind::PermanentError,
                attempts: Vec::new(),
            });
        }

        let mut worst: Option<ErrorKind> = None;
        let mut attempts = Vec::with_capacity(plan.len());

        for (i, strategy) in plan.iter().enumerate() {
            if i > 0 {
                sleep(self.pacing_delay()).await;
            }

            let id = strategy.id();
            self.governor.await_turn(id).await;

            let started = Instant::now();
            let result = self.attempt(strategy.as_ref(), subject).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let outcome = match &result {
                Ok(_) => StrategyOutcome::success(id, latency_ms),
                Err(failure) => StrategyOutcome::failure(id, latency_ms, failure.kind),
            };
            self.metrics.record(&outcome).await;
            self.governor.record_outcome(&outcome).await;

            match result {
                Ok(quote) => {
                    let quote = quote.observed_at(self.clock.now());
                    tracing::info!(
                        strategy = %id,
                        price = %quote.price_amount(),
                        latency_ms,
                        "Strategy returned a price"
                    );
                    return Ok(quote);
                }
                Err(failure) => {
                    tracing::warn!(
                        strategy = %id,
                        kind = %failure.kind,
                        error = %failure.message,
                        latency_ms,
                        "Strategy failed"
                    );

                    if failure.kind == ErrorKind::AuthError && strategy.requires_auth() {
                        if let Some(auth) = &self.auth {
                            auth.invalidate().await;
                        }
                    }

                    worst = Some(worst.map_or(failure.kind, |k| k.most_specific(failure.kind)));
                    attempts.push(outcome);
                }
            }
        }

        Err(SelectorFailure {
            kind: worst.unwrap_or(ErrorKind::PermanentError),
            attempts,
        })
    }

    /// Eligible strategies in the order they will be tried
    fn plan(&self, subject: &Subject) -> Vec<Arc<dyn TransportStrategy>> {
        let mut plan: Vec<_> = self
            .strategies
            .iter()
            .filter(|s| subject.allows(s.id()))
            .cloned()
            .collect();

        if self.config.shuffle {
            plan.shuffle(&mut rand::thread_rng());
        }
        plan
    }

    fn pacing_delay(&self) -> Duration {
        let min = self.config.pacing_min.as_millis() as u64;
        let max = self.config.pacing_max.as_millis() as u64;
        if max <= min {
            return self.config.pacing_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn attempt(
        &self,
        strategy: &dyn TransportStrategy,
        subject: &Subject,
    ) -> Result<PriceQuote, StrategyFailure> {
        if !strategy.requires_auth() {
            return strategy.attempt(subject, None).await;
        }

        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| StrategyFailure::auth("no auth token manager configured"))?;
        let token = auth
            .get_token()
            .await
            .map_err(|e| StrategyFailure::auth(e.to_string()))?;

        strategy.attempt(subject, Some(&token)).await
    }
}
