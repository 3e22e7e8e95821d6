//! Portal marketplace search strategy

use super::{live_quote, lowest_listing_price};
use crate::{
    catalog::Subject,
    constants::{PORTAL_ORIGIN, PORTAL_SEARCH, PORTAL_SEARCH_URL, SEARCH_LIMIT},
    error::{StrategyFailure, TransportError},
    http::{randomized_headers, read_json},
    strategy::TransportStrategy,
    types::{AuthToken, PriceQuote, StrategyId},
};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Authenticated listing search on Portal, cheapest first
pub struct PortalSearchStrategy {
    client: Client,
    url: String,
}

impl PortalSearchStrategy {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, PORTAL_SEARCH_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn query<'a>(subject: &'a Subject, limit: &'a str) -> [(&'static str, &'a str); 5] {
        [
            ("offset", "0"),
            ("limit", limit),
            ("sort_by", "price asc"),
            ("filter_by_collections", subject.query_name()),
            ("status", "listed"),
        ]
    }

    fn parse_response(
        &self,
        subject: &Subject,
        response: SearchResponse,
    ) -> Result<PriceQuote, StrategyFailure> {
        let price = lowest_listing_price(&response.results).ok_or_else(|| {
            StrategyFailure::from(TransportError::NotFound(format!(
                "no Portal listings for {}",
                subject.query_name()
            )))
        })?;

        live_quote(subject, price, self.id())
    }
}

#[async_trait]
impl TransportStrategy for PortalSearchStrategy {
    fn id(&self) -> StrategyId {
        PORTAL_SEARCH
    }

    fn requires_auth(&self) -> bool {
        true
    }

    async fn attempt(
        &self,
        subject: &Subject,
        auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure> {
        let token = auth.ok_or(TransportError::MissingToken)?;
        tracing::debug!(subject = subject.query_name(), "Searching Portal listings");

        let limit = SEARCH_LIMIT.to_string();
        let response = self
            .client
            .get(&self.url)
            .headers(randomized_headers(PORTAL_ORIGIN))
            .header(AUTHORIZATION, token.value())
            .query(&Self::query(subject, &limit))
            .send()
            .await
            .map_err(TransportError::NetworkError)?;

        let response: SearchResponse = read_json(response, "Portal search").await?;
        self.parse_response(subject, response)
    }
}
