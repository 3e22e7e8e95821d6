//! Transport strategy implementations

pub mod giftcharts;
pub mod portal;
pub mod stickers_tools;
pub mod tonnel;

pub use giftcharts::GiftChartsStrategy;
pub use portal::PortalSearchStrategy;
pub use stickers_tools::StickersToolsStrategy;
pub use tonnel::{TonnelFloorStatsStrategy, TonnelSearchStrategy};

use crate::{
    catalog::Subject,
    config::ResolverConfig,
    error::StrategyFailure,
    http::parse_price,
    strategy::TransportStrategy,
    types::{Currency, PriceQuote, QuoteSource, StrategyId},
};
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;

/// Builds every strategy the configuration enables, in preference order
///
/// Tonnel floor stats is only registered when Tonnel init data is configured,
/// Portal search only when an auth manager will be available to feed it.
pub fn default_strategies(config: &ResolverConfig, client: Client) -> Vec<Arc<dyn TransportStrategy>> {
    let mut strategies: Vec<Arc<dyn TransportStrategy>> =
        vec![Arc::new(TonnelSearchStrategy::new(client.clone()))];

    if let Some(init_data) = &config.tonnel_init_data {
        strategies.push(Arc::new(TonnelFloorStatsStrategy::new(
            client.clone(),
            init_data.clone(),
        )));
    }

    if config.portal_init_data.is_some() {
        strategies.push(Arc::new(PortalSearchStrategy::new(client.clone())));
    }

    strategies.push(Arc::new(GiftChartsStrategy::new(client.clone())));
    strategies.push(Arc::new(StickersToolsStrategy::new(client)));
    strategies
}

/// Lowest positive `price` among marketplace listings
pub(crate) fn lowest_listing_price<'a>(listings: impl IntoIterator<Item = &'a Value>) -> Option<Decimal> {
    listings
        .into_iter()
        .filter_map(|listing| listing.get("price").and_then(parse_price))
        .filter(|price| *price > Decimal::ZERO)
        .min()
}

/// Wraps a TON price found by `strategy` into a live quote
///
/// Stamped with the system time; the selector restamps it with its own clock.
pub(crate) fn live_quote(
    subject: &Subject,
    price: Decimal,
    strategy: StrategyId,
) -> Result<PriceQuote, StrategyFailure> {
    PriceQuote::new(
        subject.query_name(),
        price,
        Currency::Ton,
        Utc::now(),
        QuoteSource::Live(strategy),
    )
    .ok_or_else(|| StrategyFailure::permanent(format!("{strategy} returned a non-positive price")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lowest_listing_price_skips_junk() {
        let listings = json!([
            {"price": "2.75"},
            {"price": 0},
            {"price": 1.97},
            {"name": "no price"},
            {"price": "oops"}
        ]);
        let listings = listings.as_array().unwrap();
        assert_eq!(lowest_listing_price(listings), Some(Decimal::new(197, 2)));
        assert_eq!(lowest_listing_price(&[]), None);
    }

    #[test]
    fn test_default_strategies_follow_config() {
        let client = Client::new();
        let ids = |config: &ResolverConfig| {
            default_strategies(config, client.clone())
                .iter()
                .map(|s| s.id().as_str())
                .collect::<Vec<_>>()
        };

        let mut config = ResolverConfig::default();
        assert_eq!(ids(&config), vec!["tonnel_search", "giftcharts", "stickers_tools"]);

        config.tonnel_init_data = Some("user=...".to_string());
        config.portal_init_data = Some("query_id=...".to_string());
        assert_eq!(
            ids(&config),
            vec![
                "tonnel_search",
                "tonnel_floor_stats",
                "portal_search",
                "giftcharts",
                "stickers_tools"
            ]
        );
    }
}
