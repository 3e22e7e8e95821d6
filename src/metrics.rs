//! Strategy health metrics collection and reporting
//!
//! Tracks latency percentiles and success rates per transport strategy.

use crate::error::ErrorKind;
use crate::types::{StrategyId, StrategyOutcome};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum number of samples to keep per strategy
const MAX_SAMPLES: usize = 100;

/// Metrics for a single strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub strategy_id: StrategyId,
    /// 50th percentile latency of successful attempts in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful attempts in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Kind of the most recent failure, if any
    pub last_error_kind: Option<ErrorKind>,
}

impl StrategyMetrics {
    /// Creates metrics with no data
    pub fn empty(strategy_id: StrategyId) -> Self {
        Self {
            strategy_id,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
            last_error_kind: None,
        }
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    /// Rolling window of (latency, success) samples
    samples: VecDeque<(f64, bool)>,
    total_requests: u64,
    failed_requests: u64,
    last_error_kind: Option<ErrorKind>,
}

/// Collects outcomes of one strategy
#[derive(Debug)]
pub struct MetricsCollector {
    strategy_id: StrategyId,
    state: RwLock<CollectorState>,
}

impl MetricsCollector {
    pub fn new(strategy_id: StrategyId) -> Self {
        Self {
            strategy_id,
            state: RwLock::new(CollectorState {
                samples: VecDeque::with_capacity(MAX_SAMPLES),
                ..CollectorState::default()
            }),
        }
    }

    pub async fn record(&self, outcome: &StrategyOutcome) {
        let mut state = self.state.write().await;
        state.total_requests += 1;
        if !outcome.success {
            state.failed_requests += 1;
            state.last_error_kind = outcome.error_kind;
        }

        if state.samples.len() >= MAX_SAMPLES {
            state.samples.pop_front();
        }
        state
            .samples
            .push_back((outcome.latency_ms as f64, outcome.success));
    }

    /// Computes current metrics from collected samples
    pub async fn get_metrics(&self) -> StrategyMetrics {
        let state = self.state.read().await;
        if state.samples.is_empty() {
            return StrategyMetrics::empty(self.strategy_id);
        }

        let mut latencies: Vec<f64> = state
            .samples
            .iter()
            .filter(|(_, success)| *success)
            .map(|(latency, _)| *latency)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let success_rate = if state.total_requests > 0 {
            (state.total_requests - state.failed_requests) as f64 / state.total_requests as f64
        } else {
            1.0
        };

        StrategyMetrics {
            strategy_id: self.strategy_id,
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            last_error_kind: state.last_error_kind,
        }
    }
}

/// Metrics of every strategy that has been attempted at least once
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    collectors: RwLock<HashMap<StrategyId, Arc<MetricsCollector>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: &StrategyOutcome) {
        let collector = {
            let mut collectors = self.collectors.write().await;
            collectors
                .entry(outcome.strategy_id)
                .or_insert_with(|| Arc::new(MetricsCollector::new(outcome.strategy_id)))
                .clone()
        };
        collector.record(outcome).await;
    }

    /// Metrics of all known strategies, ordered by id
    pub async fn snapshot(&self) -> Vec<StrategyMetrics> {
        let collectors: Vec<_> = self.collectors.read().await.values().cloned().collect();

        let mut metrics = Vec::with_capacity(collectors.len());
        for collector in collectors {
            metrics.push(collector.get_metrics().await);
        }
        metrics.sort_by_key(|m| m.strategy_id);
        metrics
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    // Nearest-rank: smallest value with at least p% of samples at or below it
    let rank = (p / 100.0 * sorted_values.len() as f64).ceil() as usize;
    sorted_values[rank.clamp(1, sorted_values.len()) - 1]
}
