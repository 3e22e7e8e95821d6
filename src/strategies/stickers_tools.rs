//! stickers.tools floor price strategy

use super::live_quote;
use crate::{
    catalog::{normalize_name, Subject},
    constants::{STICKERS_TOOLS, STICKERS_TOOLS_STATS_URL},
    error::{StrategyFailure, TransportError},
    http::{parse_price, read_json},
    strategy::TransportStrategy,
    types::{AuthToken, PriceQuote, StrategyId},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct StatsResponse {
    collections: HashMap<String, CollectionStats>,
}

#[derive(Debug, Deserialize)]
struct CollectionStats {
    name: String,
    #[serde(default)]
    stickers: Vec<StickerStats>,
}

#[derive(Debug, Deserialize)]
struct StickerStats {
    name: String,
    #[serde(default)]
    floor_price_ton: Value,
}

/// Sticker floor prices from stickers.tools
pub struct StickersToolsStrategy {
    client: Client,
    url: String,
}

impl StickersToolsStrategy {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, STICKERS_TOOLS_STATS_URL)
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
        stats: StatsResponse,
    ) -> Result<PriceQuote, StrategyFailure> {
        let collection = subject.collection().ok_or_else(|| {
            StrategyFailure::permanent(format!("{} has no sticker collection", subject.name()))
        })?;
        let collection_key = normalize_name(collection);
        let sticker_key = subject.key();

        let sticker = stats
            .collections
            .values()
            .filter(|c| normalize_name(&c.name) == collection_key)
            .flat_map(|c| c.stickers.iter())
            .find(|s| normalize_name(&s.name) == sticker_key)
            .ok_or_else(|| {
                TransportError::NotFound(format!(
                    "{} / {} not listed on stickers.tools",
                    collection,
                    subject.query_name()
                ))
            })?;

        let price = parse_price(&sticker.floor_price_ton).ok_or_else(|| {
            TransportError::InvalidResponse(format!(
                "stickers.tools floor price for {} is not a number",
                sticker.name
            ))
        })?;

        live_quote(subject, price, self.id())
    }
}

#[async_trait]
impl TransportStrategy for StickersToolsStrategy {
    fn id(&self) -> StrategyId {
        STICKERS_TOOLS
    }

    async fn attempt(
        &self,
        subject: &Subject,
        _auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure> {
        tracing::debug!(
            subject = subject.query_name(),
            collection = subject.collection(),
            "Fetching stickers.tools stats"
        );

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(TransportError::NetworkError)?;

        let stats: StatsResponse = read_json(response, "stickers.tools").await?;
        self.parse_response(subject, stats)
    }
}
