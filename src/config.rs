//! Runtime configuration
//!
//! [`ResolverConfig::default`] mirrors the compile-time defaults in
//! [`crate::constants`]; [`ResolverConfig::from_env`] overrides them from
//! `GIFT_PRICE_*` environment variables.

use crate::{
    constants::{
        DEFAULT_DATABASE_URL, DEFAULT_TOKEN_FILE, HISTORICAL_CACHE_TTL_SECS,
        HISTORICAL_RECENT_DAYS, HISTORICAL_STALE_DAYS, HISTORY_RETENTION_DAYS,
        LIVE_CACHE_TTL_SECS, PACING_MAX_MS, PACING_MIN_MS, REQUEST_TIMEOUT_SECS,
        RESOLVE_TIMEOUT_SECS, TOKEN_GRACE_SECS, TOKEN_TTL_SECS,
    },
    error::ConfigError,
    governor::GovernorConfig,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Everything needed to assemble a [`crate::PriceResolver`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// SQLite URL of the price history
    pub database_url: String,
    /// Where the Portal token is persisted; `None` keeps it in memory only
    pub token_file: Option<PathBuf>,
    /// Telegram WebApp init data for Portal; enables `portal_search`
    pub portal_init_data: Option<String>,
    /// Telegram WebApp init data for Tonnel; enables `tonnel_floor_stats`
    pub tonnel_init_data: Option<String>,
    /// Extra subject catalog entries (JSON)
    pub catalog_path: Option<PathBuf>,
    pub live_cache_ttl: Duration,
    pub historical_cache_ttl: Duration,
    pub historical_recent_days: i64,
    pub historical_stale_days: i64,
    pub history_retention_days: i64,
    pub request_timeout: Duration,
    /// Default budget of a `get_price` call
    pub resolve_timeout: Duration,
    pub governor: GovernorConfig,
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    /// Try strategies in random order instead of preference order
    pub shuffle_strategies: bool,
    pub token_ttl_secs: u64,
    pub token_grace_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            token_file: Some(PathBuf::from(DEFAULT_TOKEN_FILE)),
            portal_init_data: None,
            tonnel_init_data: None,
            catalog_path: None,
            live_cache_ttl: Duration::from_secs(LIVE_CACHE_TTL_SECS),
            historical_cache_ttl: Duration::from_secs(HISTORICAL_CACHE_TTL_SECS),
            historical_recent_days: HISTORICAL_RECENT_DAYS,
            historical_stale_days: HISTORICAL_STALE_DAYS,
            history_retention_days: HISTORY_RETENTION_DAYS,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            resolve_timeout: Duration::from_secs(RESOLVE_TIMEOUT_SECS),
            governor: GovernorConfig::default(),
            pacing_min: Duration::from_millis(PACING_MIN_MS),
            pacing_max: Duration::from_millis(PACING_MAX_MS),
            shuffle_strategies: true,
            token_ttl_secs: TOKEN_TTL_SECS,
            token_grace_secs: TOKEN_GRACE_SECS,
        }
    }
}

impl ResolverConfig {
    /// Reads overrides from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("GIFT_PRICE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(path) = env.raw("GIFT_PRICE_TOKEN_FILE") {
            let path = path.trim();
            config.token_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        config.portal_init_data = env.string("GIFT_PRICE_PORTAL_INIT_DATA");
        config.tonnel_init_data = env.string("GIFT_PRICE_TONNEL_INIT_DATA");
        config.catalog_path = env.string("GIFT_PRICE_CATALOG").map(PathBuf::from);

        if let Some(secs) = env.parse("GIFT_PRICE_LIVE_CACHE_TTL_SECS")? {
            config.live_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse("GIFT_PRICE_HISTORICAL_CACHE_TTL_SECS")? {
            config.historical_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(days) = env.parse("GIFT_PRICE_HISTORICAL_RECENT_DAYS")? {
            config.historical_recent_days = days;
        }
        if let Some(days) = env.parse("GIFT_PRICE_HISTORICAL_STALE_DAYS")? {
            config.historical_stale_days = days;
        }
        if let Some(days) = env.parse("GIFT_PRICE_HISTORY_RETENTION_DAYS")? {
            config.history_retention_days = days;
        }
        if let Some(secs) = env.parse("GIFT_PRICE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse("GIFT_PRICE_RESOLVE_TIMEOUT_SECS")? {
            config.resolve_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env.parse("GIFT_PRICE_MIN_INTERVAL_MS")? {
            config.governor.min_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse("GIFT_PRICE_PENALTY_BASE_MS")? {
            config.governor.penalty_base = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse("GIFT_PRICE_PENALTY_CAP_MS")? {
            config.governor.penalty_cap = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse("GIFT_PRICE_PACING_MIN_MS")? {
            config.pacing_min = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse("GIFT_PRICE_PACING_MAX_MS")? {
            config.pacing_max = Duration::from_millis(ms);
        }
        if let Some(shuffle) = env.parse("GIFT_PRICE_SHUFFLE_STRATEGIES")? {
            config.shuffle_strategies = shuffle;
        }
        if let Some(secs) = env.parse("GIFT_PRICE_TOKEN_TTL_SECS")? {
            config.token_ttl_secs = secs;
        }
        if let Some(secs) = env.parse("GIFT_PRICE_TOKEN_GRACE_SECS")? {
            config.token_grace_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pacing_min > self.pacing_max {
            return Err(ConfigError::invalid(
                "GIFT_PRICE_PACING_MIN_MS",
                "must not exceed GIFT_PRICE_PACING_MAX_MS",
            ));
        }
        if self.governor.penalty_base > self.governor.penalty_cap {
            return Err(ConfigError::invalid(
                "GIFT_PRICE_PENALTY_BASE_MS",
                "must not exceed GIFT_PRICE_PENALTY_CAP_MS",
            ));
        }
        if self.historical_recent_days <= 0 || self.historical_stale_days < self.historical_recent_days {
            return Err(ConfigError::invalid(
                "GIFT_PRICE_HISTORICAL_STALE_DAYS",
                "windows must be positive and the stale window at least the recent one",
            ));
        }
        if self.token_grace_secs >= self.token_ttl_secs {
            return Err(ConfigError::invalid(
                "GIFT_PRICE_TOKEN_GRACE_SECS",
                "must be shorter than the token lifetime",
            ));
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    /// Non-blank value with surrounding whitespace removed
    fn string(&self, var: &str) -> Option<String> {
        self.raw(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(var)
            .map(|v| v.parse().map_err(|e| ConfigError::invalid(var, e)))
            .transpose()
    }
}
