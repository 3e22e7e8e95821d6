//! TON/USD exchange rate from CoinGecko

use crate::{
    clock::Clock,
    constants::{COINGECKO_SIMPLE_PRICE_URL, COINGECKO_TON_ID, FALLBACK_TON_USD, TON_RATE_CACHE_SECS},
    error::TransportError,
    http::{parse_price, read_json},
};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout_at, Instant};

/// CoinGecko API response for simple price queries
#[derive(Debug, Deserialize)]
struct CoinGeckoResponse {
    #[serde(flatten)]
    prices: HashMap<String, CoinGeckoPriceData>,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoPriceData {
    #[serde(default)]
    usd: Value,
}

/// Cached TON/USD rate
///
/// Never fails: when CoinGecko is unreachable the last known rate is used,
/// and before any successful fetch a fixed fallback rate.
pub struct TonUsdRate {
    client: Client,
    url: String,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    cached: RwLock<Option<(Decimal, DateTime<Utc>)>>,
}

impl TonUsdRate {
    pub fn new(client: Client, clock: Arc<dyn Clock>) -> Self {
        Self::with_url(client, COINGECKO_SIMPLE_PRICE_URL, clock)
    }

    pub fn with_url(client: Client, url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            url: url.into(),
            clock,
            ttl: TimeDelta::seconds(TON_RATE_CACHE_SECS as i64),
            cached: RwLock::new(None),
        }
    }

    /// Current rate, fetched at most once per cache period
    pub async fn current(&self) -> Decimal {
        let now = self.clock.now();
        let last = *self.cached.read().await;

        if let Some((rate, fetched_at)) = last {
            if now - fetched_at < self.ttl {
                return rate;
            }
        }

        match self.fetch().await {
            Ok(rate) => {
                self.update(rate).await;
                rate
            }
            Err(e) => {
                let rate = last.map(|(rate, _)| rate).unwrap_or_else(fallback_rate);
                tracing::warn!(error = %e, rate = %rate, "Failed to fetch TON/USD rate, using last known");
                rate
            }
        }
    }

    /// Like [`current`](Self::current), but settles for the last known rate
    /// once `deadline` passes
    pub async fn current_until(&self, deadline: Instant) -> Decimal {
        match timeout_at(deadline, self.current()).await {
            Ok(rate) => rate,
            Err(_) => {
                let rate = self.last_known().await;
                tracing::warn!(rate = %rate, "TON/USD rate fetch ran past the deadline, using last known");
                rate
            }
        }
    }

    /// Last fetched rate regardless of age, or the fallback rate
    pub async fn last_known(&self) -> Decimal {
        self.cached
            .read()
            .await
            .map(|(rate, _)| rate)
            .unwrap_or_else(fallback_rate)
    }

    /// Records a rate obtained elsewhere as the current one
    pub async fn update(&self, rate: Decimal) {
        *self.cached.write().await = Some((rate, self.clock.now()));
    }

    async fn fetch(&self) -> Result<Decimal, TransportError> {
        tracing::debug!(url = %self.url, "Fetching TON/USD rate");

        let response = self
            .client
            .get(&self.url)
            .query(&[("ids", COINGECKO_TON_ID), ("vs_currencies", "usd")])
            .send()
            .await?;

        let response: CoinGeckoResponse = read_json(response, "CoinGecko").await?;
        parse_response(response)
    }
}

fn parse_response(response: CoinGeckoResponse) -> Result<Decimal, TransportError> {
    response
        .prices
        .get(COINGECKO_TON_ID)
        .and_then(|data| parse_price(&data.usd))
        .filter(|rate| *rate > Decimal::ZERO)
        .ok_or_else(|| TransportError::InvalidResponse("No TON price returned from CoinGecko".to_string()))
}

fn fallback_rate() -> Decimal {
    Decimal::from_str(FALLBACK_TON_USD).unwrap_or(Decimal::TWO)
}
