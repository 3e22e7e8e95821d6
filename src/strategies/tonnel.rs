//! Tonnel marketplace strategies

use super::{live_quote, lowest_listing_price};
use crate::{
    catalog::Subject,
    constants::{
        SEARCH_LIMIT, TONNEL_FILTER_STATS_URL, TONNEL_FLOOR_STATS, TONNEL_ORIGIN,
        TONNEL_PAGE_GIFTS_URL, TONNEL_SEARCH,
    },
    error::{ErrorKind, StrategyFailure, TransportError},
    http::{parse_price, randomized_headers, read_json},
    strategy::TransportStrategy,
    types::{AuthToken, PriceQuote, StrategyId},
};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};

/// Request body of the `pageGifts` endpoint
#[derive(Debug, Serialize)]
struct PageGiftsRequest {
    /// Mongo-style filter, sent as a JSON string
    filter: String,
    limit: u32,
    page: u32,
    sort: &'static str,
    #[serde(rename = "ref")]
    referrer: u32,
    user_auth: &'static str,
}

impl PageGiftsRequest {
    fn cheapest_listings(subject: &Subject) -> Self {
        let filter = json!({
            "price": {"$exists": true},
            "buyer": {"$exists": false},
            "asset": "TON",
            "premarket": subject.is_premarket(),
            "gift_name": subject.query_name(),
        });

        Self {
            filter: filter.to_string(),
            limit: SEARCH_LIMIT,
            page: 1,
            sort: r#"{"price":1,"gift_id":-1}"#,
            referrer: 0,
            user_auth: "",
        }
    }
}

/// Anonymous listing search, sorted by ascending price
///
/// Works for premarket and regular gifts and needs no credentials, which makes
/// it the most CloudFlare-tolerant way into Tonnel.
pub struct TonnelSearchStrategy {
    client: Client,
    url: String,
}

impl TonnelSearchStrategy {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, TONNEL_PAGE_GIFTS_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn parse_response(&self, subject: &Subject, body: Value) -> Result<PriceQuote, StrategyFailure> {
        let listings = match body {
            Value::Array(listings) => listings,
            other => return Err(upstream_message_failure(&other)),
        };

        let price = lowest_listing_price(&listings).ok_or_else(|| {
            StrategyFailure::from(TransportError::NotFound(format!(
                "no Tonnel listings for {}",
                subject.query_name()
            )))
        })?;

        live_quote(subject, price, self.id())
    }
}

#[async_trait]
impl TransportStrategy for TonnelSearchStrategy {
    fn id(&self) -> StrategyId {
        TONNEL_SEARCH
    }

    async fn attempt(
        &self,
        subject: &Subject,
        _auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure> {
        tracing::debug!(
            subject = subject.query_name(),
            premarket = subject.is_premarket(),
            "Searching Tonnel listings"
        );

        let response = self
            .client
            .post(&self.url)
            .headers(randomized_headers(TONNEL_ORIGIN))
            .json(&PageGiftsRequest::cheapest_listings(subject))
            .send()
            .await
            .map_err(TransportError::NetworkError)?;

        let body: Value = read_json(response, "Tonnel pageGifts").await?;
        self.parse_response(subject, body)
    }
}

/// Floor prices from Tonnel's authenticated statistics endpoint
///
/// Authenticates with static Telegram WebApp init data; premarket gifts never
/// appear here.
pub struct TonnelFloorStatsStrategy {
    client: Client,
    url: String,
    init_data: String,
}

impl TonnelFloorStatsStrategy {
    pub fn new(client: Client, init_data: String) -> Self {
        Self::with_url(client, TONNEL_FILTER_STATS_URL, init_data)
    }

    pub fn with_url(client: Client, url: impl Into<String>, init_data: String) -> Self {
        Self {
            client,
            url: url.into(),
            init_data,
        }
    }

    fn parse_response(&self, subject: &Subject, body: Value) -> Result<PriceQuote, StrategyFailure> {
        if body.get("status").and_then(Value::as_str) != Some("success") {
            return Err(upstream_message_failure(&body));
        }

        // Keys are "<gift>" or "<gift>_<model>"
        let gift = subject.query_name().to_lowercase();
        let model_prefix = format!("{gift}_");
        let price = body
            .get("data")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .filter(|(key, _)| {
                let key = key.to_lowercase();
                key == gift || key.starts_with(&model_prefix)
            })
            .filter_map(|(_, stats)| stats.pointer("/data/floorPrice").and_then(parse_price))
            .filter(|price| *price > Decimal::ZERO)
            .min()
            .ok_or_else(|| {
                StrategyFailure::from(TransportError::NotFound(format!(
                    "no Tonnel floor price for {}",
                    subject.query_name()
                )))
            })?;

        live_quote(subject, price, self.id())
    }
}

#[async_trait]
impl TransportStrategy for TonnelFloorStatsStrategy {
    fn id(&self) -> StrategyId {
        TONNEL_FLOOR_STATS
    }

    async fn attempt(
        &self,
        subject: &Subject,
        _auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure> {
        tracing::debug!(subject = subject.query_name(), "Fetching Tonnel floor stats");

        let response = self
            .client
            .post(&self.url)
            .headers(randomized_headers(TONNEL_ORIGIN))
            .json(&json!({ "authData": self.init_data }))
            .send()
            .await
            .map_err(TransportError::NetworkError)?;

        let body: Value = read_json(response, "Tonnel filterStats").await?;
        self.parse_response(subject, body)
    }
}

/// Classifies an error document returned with HTTP 200
fn upstream_message_failure(body: &Value) -> StrategyFailure {
    let message = ["message", "error", "status"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("unexpected Tonnel response: {body}"));

    StrategyFailure::new(ErrorKind::classify_message(&message), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SubjectCatalog, SubjectKind};

    fn premarket() -> Subject {
        SubjectCatalog::default().lookup("Happy_Brownie")
    }

    #[test]
    fn test_page_gifts_request_filters_premarket() {
        let request = PageGiftsRequest::cheapest_listings(&premarket());
        let filter: Value = serde_json::from_str(&request.filter).unwrap();
        assert_eq!(filter["gift_name"], "Happy Brownie");
        assert_eq!(filter["premarket"], true);
        assert_eq!(filter["buyer"]["$exists"], false);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["ref"], 0);
        assert_eq!(body["limit"], 5);
    }

    #[test]
    fn test_search_picks_cheapest_listing() {
        let strategy = TonnelSearchStrategy::new(Client::new());
        let body = json!([{"price": 2.1, "gift_id": 1}, {"price": 1.97, "gift_id": 2}]);

        let quote = strategy.parse_response(&premarket(), body).unwrap();
        assert_eq!(quote.price_amount(), Decimal::new(197, 2));
        assert_eq!(quote.subject_name(), "Happy Brownie");
    }

    #[test]
    fn test_search_without_listings_is_permanent() {
        let strategy = TonnelSearchStrategy::new(Client::new());
        let failure = strategy.parse_response(&premarket(), json!([])).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::PermanentError);
    }

    #[test]
    fn test_search_error_document_is_classified() {
        let strategy = TonnelSearchStrategy::new(Client::new());
        let failure = strategy
            .parse_response(&premarket(), json!({"message": "Too many requests"}))
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_floor_stats_matches_gift_keys() {
        let strategy = TonnelFloorStatsStrategy::new(Client::new(), "init".to_string());
        let subject = Subject::new("Lol Pop", SubjectKind::Gift);
        let body = json!({
            "status": "success",
            "data": {
                "Lol Pop_Cool Cat": {"data": {"floorPrice": 3.4}},
                "Lol Pop_Party": {"data": {"floorPrice": 2.9}},
                "Jelly Bunny_Blue": {"data": {"floorPrice": 1.1}}
            }
        });

        let quote = strategy.parse_response(&subject, body).unwrap();
        assert_eq!(quote.price_amount(), Decimal::new(29, 1));
    }

    #[test]
    fn test_floor_stats_ignores_gifts_containing_the_name() {
        let strategy = TonnelFloorStatsStrategy::new(Client::new(), "init".to_string());
        let subject = Subject::new("Cap", SubjectKind::Gift);
        let body = json!({
            "status": "success",
            "data": {
                "Durov's Cap_Gold": {"data": {"floorPrice": 0.5}},
                "Top Cap_Red": {"data": {"floorPrice": 0.7}},
                "cap_Blue": {"data": {"floorPrice": 4.2}}
            }
        });

        let quote = strategy.parse_response(&subject, body).unwrap();
        assert_eq!(quote.price_amount(), Decimal::new(42, 1));
    }

    #[test]
    fn test_floor_stats_auth_rejection() {
        let strategy = TonnelFloorStatsStrategy::new(Client::new(), "init".to_string());
        let subject = Subject::new("Lol Pop", SubjectKind::Gift);
        let failure = strategy
            .parse_response(&subject, json!({"status": "error", "message": "invalid auth data"}))
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::AuthError);
    }
}
