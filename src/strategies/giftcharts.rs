//! giftcharts.onrender.com strategy

use super::live_quote;
use crate::{
    catalog::{normalize_name, Subject},
    constants::{GIFTCHARTS, GIFTCHARTS_GIFTS_URL},
    error::{StrategyFailure, TransportError},
    http::{parse_price, read_json},
    strategy::TransportStrategy,
    types::{AuthToken, PriceQuote, StrategyId},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct GiftEntry {
    name: String,
    #[serde(rename = "priceTon", default)]
    price_ton: Value,
}

/// Aggregated gift prices from the giftcharts API
///
/// Slow to update but rarely blocked, so it sits at the end of the chain.
pub struct GiftChartsStrategy {
    client: Client,
    url: String,
}

impl GiftChartsStrategy {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, GIFTCHARTS_GIFTS_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn parse_response(
        &self,
        subject: &Subject,
        gifts: Vec<GiftEntry>,
    ) -> Result<PriceQuote, StrategyFailure> {
        let wanted = subject.key();
        let gift = gifts
            .into_iter()
            .find(|gift| normalize_name(&gift.name) == wanted)
            .ok_or_else(|| {
                TransportError::NotFound(format!("{} not listed on giftcharts", subject.query_name()))
            })?;

        let price = parse_price(&gift.price_ton).ok_or_else(|| {
            TransportError::InvalidResponse(format!("giftcharts priceTon for {} is not a number", gift.name))
        })?;

        live_quote(subject, price, self.id())
    }
}

#[async_trait]
impl TransportStrategy for GiftChartsStrategy {
    fn id(&self) -> StrategyId {
        GIFTCHARTS
    }

    async fn attempt(
        &self,
        subject: &Subject,
        _auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure> {
        tracing::debug!(subject = subject.query_name(), "Fetching giftcharts gift list");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(TransportError::NetworkError)?;

        let gifts: Vec<GiftEntry> = read_json(response, "giftcharts").await?;
        self.parse_response(subject, gifts)
    }
}
