//! Constants for the gift price resolver
//!
//! Defaults for every tunable live here. `ResolverConfig::default()` is built
//! from them and `ResolverConfig::from_env()` overrides them at runtime.

use crate::types::StrategyId;

/// How long a live quote stays in the in-memory cache (in seconds)
pub const LIVE_CACHE_TTL_SECS: u64 = 10 * 60;

/// How long a historical quote stays in the in-memory cache (in seconds)
pub const HISTORICAL_CACHE_TTL_SECS: u64 = 2 * 60;

/// Tight staleness window for historical fallback (in days)
pub const HISTORICAL_RECENT_DAYS: i64 = 7;

/// Loose staleness window for historical fallback (in days)
pub const HISTORICAL_STALE_DAYS: i64 = 30;

/// History rows older than this are pruned by the refresh task (in days)
pub const HISTORY_RETENTION_DAYS: i64 = 90;

/// HTTP request timeout for a single strategy attempt (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default caller timeout for a whole resolution (in seconds)
pub const RESOLVE_TIMEOUT_SECS: u64 = 45;

/// Minimum spacing between two calls to the same strategy (in milliseconds)
pub const MIN_CALL_INTERVAL_MS: u64 = 2000;

/// First rate-limit penalty (in milliseconds)
pub const PENALTY_BASE_MS: u64 = 2000;

/// Rate-limit penalties never exceed this (in milliseconds)
pub const PENALTY_CAP_MS: u64 = 5000;

/// Random pause between two strategy attempts (in milliseconds)
pub const PACING_MIN_MS: u64 = 500;
pub const PACING_MAX_MS: u64 = 1500;

/// Portal auth token lifetime (in seconds)
pub const TOKEN_TTL_SECS: u64 = 1920;

/// Refresh a token this long before it would expire (in seconds)
pub const TOKEN_GRACE_SECS: u64 = 300;

/// How often the refresh task re-resolves its watchlist (in seconds)
pub const REFRESH_INTERVAL_SECS: u64 = 32 * 60;

/// Pause between two subjects inside one refresh cycle (in milliseconds)
pub const REFRESH_SUBJECT_SPACING_MS: u64 = 2000;

/// TON/USD rate cache lifetime (in seconds)
pub const TON_RATE_CACHE_SECS: u64 = 300;

/// Rate used when no TON/USD quote was ever fetched
pub const FALLBACK_TON_USD: &str = "2.10";

/// Default SQLite database for the price history
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sqlite_data/historical_prices.db";

/// Default location of the persisted Portal token
pub const DEFAULT_TOKEN_FILE: &str = "sqlite_data/portal_auth_token.json";

/// Number of listings requested from search endpoints
pub const SEARCH_LIMIT: u32 = 5;

/// Tonnel listing search endpoint
pub const TONNEL_PAGE_GIFTS_URL: &str = "https://gifts2.tonnel.network/api/pageGifts";

/// Tonnel floor statistics endpoint
pub const TONNEL_FILTER_STATS_URL: &str = "https://gifts3.tonnel.network/api/filterStats";

/// Origin sent with Tonnel requests
pub const TONNEL_ORIGIN: &str = "https://market.tonnel.network";

/// Portal listing search endpoint
pub const PORTAL_SEARCH_URL: &str = "https://portal-market.com/api/nfts/search";

/// Origin sent with Portal requests
pub const PORTAL_ORIGIN: &str = "https://portal-market.com";

/// giftcharts gift list endpoint
pub const GIFTCHARTS_GIFTS_URL: &str = "https://giftcharts-api.onrender.com/gifts";

/// stickers.tools statistics endpoint
pub const STICKERS_TOOLS_STATS_URL: &str = "https://stickers.tools/api/stats";

/// CoinGecko simple price endpoint
pub const COINGECKO_SIMPLE_PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

/// CoinGecko id of Toncoin
pub const COINGECKO_TON_ID: &str = "the-open-network";

/// User agent for requests that do not rotate browser headers
pub const USER_AGENT: &str = "gift-price-resolver/0.1.0";

pub const TONNEL_SEARCH: StrategyId = StrategyId::new("tonnel_search");
pub const TONNEL_FLOOR_STATS: StrategyId = StrategyId::new("tonnel_floor_stats");
pub const PORTAL_SEARCH: StrategyId = StrategyId::new("portal_search");
pub const GIFTCHARTS: StrategyId = StrategyId::new("giftcharts");
pub const STICKERS_TOOLS: StrategyId = StrategyId::new("stickers_tools");

/// Strategies tried for regular market gifts
pub const GIFT_STRATEGIES: &[StrategyId] =
    &[TONNEL_SEARCH, TONNEL_FLOOR_STATS, PORTAL_SEARCH, GIFTCHARTS];

/// Premarket gifts have no floor stats and are not listed on Portal yet
pub const PREMARKET_STRATEGIES: &[StrategyId] = &[TONNEL_SEARCH];

/// Stickers are only priced by stickers.tools
pub const STICKER_STRATEGIES: &[StrategyId] = &[STICKERS_TOOLS];

/// Premarket gifts known at build time: (internal name, marketplace name)
pub const PREMARKET_GIFTS: &[(&str, &str)] = &[
    ("Happy_Brownie", "Happy Brownie"),
    ("Spring_Basket", "Spring Basket"),
    ("Instant_Ramen", "Instant Ramen"),
    ("Faith_Amulet", "Faith Amulet"),
    ("Mousse_Cake", "Mousse Cake"),
    ("Ice_Cream", "Ice Cream"),
];
