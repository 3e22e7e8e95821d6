//! Types for the price resolution pipeline

use crate::error::ErrorKind;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Identifier of a transport strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(&'static str);

impl StrategyId {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for StrategyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

/// Currency a quote is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Toncoin
    Ton,
    /// US dollar
    Usd,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Ton => "TON",
            Currency::Usd => "USD",
        }
    }
}

/// Where a quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "strategy", rename_all = "snake_case")]
pub enum QuoteSource {
    /// Fetched live by the named strategy
    Live(StrategyId),
    /// Durable store, within the tight staleness window
    HistoricalRecent,
    /// Durable store, only within the loose staleness window
    HistoricalStale,
}

impl QuoteSource {
    pub fn is_historical(&self) -> bool {
        matches!(
            self,
            QuoteSource::HistoricalRecent | QuoteSource::HistoricalStale
        )
    }
}

impl fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSource::Live(id) => write!(f, "live:{id}"),
            QuoteSource::HistoricalRecent => f.write_str("historical_recent"),
            QuoteSource::HistoricalStale => f.write_str("historical_stale"),
        }
    }
}

/// A resolved price with provenance
///
/// Quotes are immutable once built, and always carry a positive amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    subject_name: String,
    price_amount: Decimal,
    price_currency: Currency,
    obtained_at: DateTime<Utc>,
    source: QuoteSource,
}

impl PriceQuote {
    /// Builds a quote, or `None` when the amount is zero or negative
    pub fn new(
        subject_name: impl Into<String>,
        price_amount: Decimal,
        price_currency: Currency,
        obtained_at: DateTime<Utc>,
        source: QuoteSource,
    ) -> Option<Self> {
        if price_amount <= Decimal::ZERO {
            return None;
        }

        Some(Self {
            subject_name: subject_name.into(),
            price_amount,
            price_currency,
            obtained_at,
            source,
        })
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn price_amount(&self) -> Decimal {
        self.price_amount
    }

    pub fn price_currency(&self) -> Currency {
        self.price_currency
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn source(&self) -> QuoteSource {
        self.source
    }

    /// Same quote observed at `at`
    pub fn observed_at(self, at: DateTime<Utc>) -> Self {
        Self {
            obtained_at: at,
            ..self
        }
    }

    /// Age of the quote relative to `now`, never negative
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.obtained_at).max(TimeDelta::zero())
    }

    /// Re-denominates the quote using a TON→USD rate
    pub fn converted(&self, currency: Currency, ton_usd: Decimal) -> Option<PriceQuote> {
        let amount = match (self.price_currency, currency) {
            (Currency::Ton, Currency::Usd) => self.price_amount.checked_mul(ton_usd)?,
            (Currency::Usd, Currency::Ton) => self.price_amount.checked_div(ton_usd)?,
            _ => self.price_amount,
        };

        PriceQuote::new(
            self.subject_name.clone(),
            amount.round_dp(4),
            currency,
            self.obtained_at,
            self.source,
        )
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} {} ({})",
            self.subject_name,
            self.price_amount,
            self.price_currency.symbol(),
            self.source
        )
    }
}

/// Bearer token required by authenticated upstreams
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    token_value: String,
    issued_at: DateTime<Utc>,
    ttl_seconds: u64,
}

impl AuthToken {
    pub fn new(token_value: impl Into<String>, issued_at: DateTime<Utc>, ttl_seconds: u64) -> Self {
        Self {
            token_value: token_value.into(),
            issued_at,
            ttl_seconds,
        }
    }

    pub fn value(&self) -> &str {
        &self.token_value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True while `now + grace` is still before expiry
    pub fn is_usable(&self, now: DateTime<Utc>, grace: TimeDelta) -> bool {
        now.checked_add_signed(grace)
            .is_some_and(|deadline| deadline < self.expires_at())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token_value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// Result of one strategy attempt, kept for logging and metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyOutcome {
    pub strategy_id: StrategyId,
    pub success: bool,
    pub latency_ms: u64,
    pub error_kind: Option<ErrorKind>,
}

impl StrategyOutcome {
    pub fn success(strategy_id: StrategyId, latency_ms: u64) -> Self {
        Self {
            strategy_id,
            success: true,
            latency_ms,
            error_kind: None,
        }
    }

    pub fn failure(strategy_id: StrategyId, latency_ms: u64, kind: ErrorKind) -> Self {
        Self {
            strategy_id,
            success: false,
            latency_ms,
            error_kind: Some(kind),
        }
    }
}

/// One row of the durable price history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoricalPriceRecord {
    pub subject_name: String,
    pub price_amount: Decimal,
    pub price_currency: Currency,
    pub recorded_at: DateTime<Utc>,
    pub source_strategy_id: String,
    /// Number of successful fetches folded into this day's row
    pub success_count: i64,
}

impl HistoricalPriceRecord {
    pub fn into_quote(self, source: QuoteSource) -> Option<PriceQuote> {
        PriceQuote::new(
            self.subject_name,
            self.price_amount,
            self.price_currency,
            self.recorded_at,
            source,
        )
    }
}

/// Overall system health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// System is healthy and all components are operational
    Healthy,
    /// System is degraded but still functional
    Degraded,
    /// System is unhealthy and requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
