//! # Gift Price Resolver
//!
//! Resolves the current market price of Telegram gifts and stickers from
//! several marketplaces (Tonnel, Portal, giftcharts, stickers.tools), falling
//! back to cached and historical prices when the upstreams misbehave.
//!
//! ## Usage
//!
//! Build one [`PriceResolver`] at startup and share it:
//!
//! ```no_run
//! use gift_price_resolver::{PriceResolver, ResolverConfig, QuoteSource};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Arc::new(PriceResolver::from_config(ResolverConfig::from_env()?).await?);
//!
//! match resolver.get_price("Happy Brownie", false, Duration::from_secs(30)).await {
//!     Ok(quote) if quote.source() == QuoteSource::HistoricalStale => {
//!         println!("{} (outdated)", quote);
//!     }
//!     Ok(quote) => println!("{}", quote),
//!     Err(unavailable) => println!("{}", unavailable),
//! }
//!
//! // Keep the premarket gifts warm in the background
//! let watchlist = vec!["Happy Brownie".to_string(), "Ice Cream".to_string()];
//! resolver.spawn_refresh_task(watchlist, Duration::from_secs(32 * 60));
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod governor;
pub mod history;
pub mod http;
pub mod metrics;
pub mod rates;
pub mod resolver;
pub mod selector;
pub mod strategies;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use catalog::{CatalogEntry, Subject, SubjectCatalog, SubjectKind};
pub use config::ResolverConfig;
pub use error::{ErrorKind, SetupError, StrategyFailure, Unavailable};
pub use metrics::StrategyMetrics;
pub use resolver::{PriceResolver, RefreshReport, ResolverBuilder};
pub use strategy::TransportStrategy;
pub use types::{
    AuthToken, ComponentHealth, Currency, HealthStatus, PriceQuote, QuoteSource, StrategyId,
};
