//! Price resolver service
//!
//! The entry point of the crate. A [`PriceResolver`] owns the quote cache, the
//! historical store, the strategy selector with its governor and the auth
//! token manager. Build one at startup and share it behind an `Arc`.
//!
//! Every lookup walks the same states:
//!
//! 1. **cache**: a cached quote is returned as is (skipped with `force_fresh`)
//! 2. **live**: the selector tries the eligible strategies
//! 3. **historical, recent**: newest stored price within the tight window
//! 4. **historical, stale**: newest stored price within the loose window
//! 5. **failed**: [`Unavailable`]

use crate::{
    auth::{AuthTokenManager, InitDataTokenSource, TokenFile, TokenStatus},
    cache::QuoteCache,
    catalog::{Subject, SubjectCatalog},
    clock::{Clock, SystemClock},
    config::ResolverConfig,
    constants::REFRESH_SUBJECT_SPACING_MS,
    error::{ErrorKind, SetupError, Unavailable},
    governor::RateGovernor,
    history::HistoricalStore,
    http::build_client,
    metrics::{MetricsRegistry, StrategyMetrics},
    rates::TonUsdRate,
    selector::{SelectorConfig, StrategySelector},
    strategies::default_strategies,
    strategy::TransportStrategy,
    types::{ComponentHealth, Currency, HealthStatus, PriceQuote, QuoteSource},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::Instrument;
use uuid::Uuid;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Where a lookup ended up before anything was committed
enum Resolution {
    Cached(PriceQuote),
    Live(PriceQuote),
    Historical(PriceQuote),
    Failed(ErrorKind),
}

/// Summary of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub unavailable: usize,
    pub pruned: u64,
}

/// Assembles a [`PriceResolver`], filling in whatever is not supplied from
/// the configuration
pub struct ResolverBuilder {
    config: ResolverConfig,
    clock: Arc<dyn Clock>,
    catalog: Option<SubjectCatalog>,
    strategies: Option<Vec<Arc<dyn TransportStrategy>>>,
    auth: Option<Arc<AuthTokenManager>>,
}

impl ResolverBuilder {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            catalog: None,
            strategies: None,
            auth: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(mut self, catalog: SubjectCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replaces the built-in strategies; order is preference order
    pub fn strategies(mut self, strategies: Vec<Arc<dyn TransportStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn auth(mut self, auth: Arc<AuthTokenManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub async fn build(self) -> Result<PriceResolver, SetupError> {
        let config = self.config;
        config.validate()?;
        let clock = self.clock;

        let client = build_client(config.request_timeout)?;

        let catalog = match (self.catalog, &config.catalog_path) {
            (Some(catalog), _) => catalog,
            (None, Some(path)) => SubjectCatalog::load(path)?,
            (None, None) => SubjectCatalog::default(),
        };

        let auth = self.auth.or_else(|| {
            config.portal_init_data.as_ref().map(|init_data| {
                let source = Arc::new(InitDataTokenSource::new(init_data.clone()));
                let mut manager = AuthTokenManager::new(source, clock.clone())
                    .with_lifetime(config.token_ttl_secs, config.token_grace_secs);
                if let Some(path) = &config.token_file {
                    manager = manager.with_token_file(TokenFile::new(path));
                }
                Arc::new(manager)
            })
        });

        let strategies = self
            .strategies
            .unwrap_or_else(|| default_strategies(&config, client.clone()));

        let history = HistoricalStore::connect(&config.database_url, clock.clone()).await?;
        let governor = Arc::new(RateGovernor::new(config.governor));
        let metrics = Arc::new(MetricsRegistry::new());

        let mut selector = StrategySelector::new(
            strategies,
            governor.clone(),
            metrics.clone(),
            SelectorConfig {
                pacing_min: config.pacing_min,
                pacing_max: config.pacing_max,
                shuffle: config.shuffle_strategies,
            },
        )
        .with_clock(clock.clone());
        if let Some(auth) = &auth {
            selector = selector.with_auth(auth.clone());
        }

        tracing::info!(
            strategies = ?selector.strategies().iter().map(|s| s.id().as_str()).collect::<Vec<_>>(),
            authenticated = auth.is_some(),
            "Price resolver ready"
        );

        Ok(PriceResolver {
            catalog,
            cache: QuoteCache::new(clock.clone()),
            history,
            selector,
            governor,
            auth,
            metrics,
            rates: TonUsdRate::new(client, clock.clone()),
            clock,
            config,
        })
    }
}

/// Resolves gift and sticker prices
///
/// # Example
/// ```no_run
/// use gift_price_resolver::{PriceResolver, ResolverConfig};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let resolver = PriceResolver::from_config(ResolverConfig::from_env()?).await?;
/// let quote = resolver.get_price("Happy Brownie", false, Duration::from_secs(30)).await?;
/// println!("{quote}");
/// # Ok(())
/// # }
/// ```
pub struct PriceResolver {
    catalog: SubjectCatalog,
    cache: QuoteCache,
    history: HistoricalStore,
    selector: StrategySelector,
    governor: Arc<RateGovernor>,
    auth: Option<Arc<AuthTokenManager>>,
    metrics: Arc<MetricsRegistry>,
    rates: TonUsdRate,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
}

impl PriceResolver {
    /// Creates a resolver with the built-in strategies and the system clock
    pub async fn from_config(config: ResolverConfig) -> Result<Self, SetupError> {
        ResolverBuilder::new(config).build().await
    }

    pub fn builder(config: ResolverConfig) -> ResolverBuilder {
        ResolverBuilder::new(config)
    }

    /// Caller budget used by the refresh task
    pub fn default_timeout(&self) -> Duration {
        self.config.resolve_timeout
    }

    pub fn catalog(&self) -> &SubjectCatalog {
        &self.catalog
    }

    pub fn ton_usd(&self) -> &TonUsdRate {
        &self.rates
    }

    /// Gets the current price of a subject
    ///
    /// # Arguments
    /// * `subject_name` - Gift or sticker name, in any spelling the catalog knows
    /// * `force_fresh` - Skip the in-memory cache and ask the upstreams
    /// * `timeout` - Budget for finding a quote; storing a found quote is not
    ///   cut short by it
    ///
    /// # Returns
    /// The best available quote, or [`Unavailable`] when there is none
    pub async fn get_price(
        &self,
        subject_name: &str,
        force_fresh: bool,
        timeout: Duration,
    ) -> Result<PriceQuote, Unavailable> {
        let subject = self.catalog.lookup(subject_name);
        let span = tracing::info_span!(
            "resolve_price",
            request_id = %Uuid::new_v4(),
            subject = subject.name(),
            force_fresh
        );

        self.resolve(&subject, force_fresh, timeout)
            .instrument(span)
            .await
    }

    /// Like [`get_price`](Self::get_price), converted into `currency`
    pub async fn get_price_in(
        &self,
        subject_name: &str,
        currency: Currency,
        force_fresh: bool,
        timeout: Duration,
    ) -> Result<PriceQuote, Unavailable> {
        let deadline = Instant::now() + timeout;
        let quote = self.get_price(subject_name, force_fresh, timeout).await?;
        if quote.price_currency() == currency {
            return Ok(quote);
        }

        let ton_usd = self.rates.current_until(deadline).await;
        quote
            .converted(currency, ton_usd)
            .ok_or_else(|| Unavailable::no_price_data(subject_name))
    }

    async fn resolve(
        &self,
        subject: &Subject,
        force_fresh: bool,
        timeout: Duration,
    ) -> Result<PriceQuote, Unavailable> {
        let deadline = Instant::now() + timeout;

        let resolution = match timeout_at(deadline, self.find_quote(subject, force_fresh)).await {
            Ok(resolution) => resolution,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Price lookup timed out");
                return Err(Unavailable::timed_out(subject.name(), timeout));
            }
        };

        match resolution {
            Resolution::Cached(quote) => Ok(quote),
            Resolution::Live(quote) => {
                self.cache.put(quote.clone(), self.config.live_cache_ttl).await;
                if let Err(e) = self.history.record(&quote).await {
                    tracing::warn!(error = %e, "Failed to record price history");
                }
                Ok(quote)
            }
            Resolution::Historical(quote) => {
                if quote.source() == QuoteSource::HistoricalRecent {
                    self.cache
                        .put(quote.clone(), self.config.historical_cache_ttl)
                        .await;
                }
                Ok(quote)
            }
            Resolution::Failed(kind) => {
                tracing::warn!(kind = %kind, "No price available from any source");
                Err(Unavailable::no_price_data(subject.name()))
            }
        }
    }

    async fn find_quote(&self, subject: &Subject, force_fresh: bool) -> Resolution {
        let key = subject.key();

        if !force_fresh {
            if let Some(quote) = self.cache.get_recent(&key, self.config.live_cache_ttl).await {
                tracing::debug!(source = %quote.source(), "Serving cached quote");
                return Resolution::Cached(quote);
            }
        }

        let failure = match self.selector.resolve(subject).await {
            Ok(quote) => return Resolution::Live(quote),
            Err(failure) => failure,
        };
        tracing::info!(
            kind = %failure.kind,
            attempts = failure.attempts.len(),
            "Live strategies failed, falling back to history"
        );

        let recent = window(self.config.historical_recent_days);
        if let Some(quote) = self.historical(&key, recent, QuoteSource::HistoricalRecent).await {
            tracing::info!(recorded_at = %quote.obtained_at(), "Serving recent historical price");
            return Resolution::Historical(quote);
        }

        let stale = window(self.config.historical_stale_days);
        if let Some(quote) = self.historical(&key, stale, QuoteSource::HistoricalStale).await {
            tracing::warn!(
                recorded_at = %quote.obtained_at(),
                age_days = quote.age(self.clock.now()).num_days(),
                "Serving stale historical price"
            );
            return Resolution::Historical(quote);
        }

        Resolution::Failed(failure.kind)
    }

    async fn historical(&self, key: &str, max_age: Duration, source: QuoteSource) -> Option<PriceQuote> {
        match self.history.most_recent(key, max_age).await {
            Ok(record) => record?.into_quote(source),
            Err(e) => {
                tracing::warn!(error = %e, "Historical price lookup failed");
                None
            }
        }
    }

    /// Force-fresh resolves every subject of `watchlist`, then prunes history
    /// past the retention window
    pub async fn refresh_watchlist(&self, watchlist: &[String]) -> RefreshReport {
        let mut report = RefreshReport::default();

        for (i, name) in watchlist.iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(REFRESH_SUBJECT_SPACING_MS)).await;
            }
            match self.get_price(name, true, self.config.resolve_timeout).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    tracing::warn!(subject = %name, error = %e, "Refresh could not price subject");
                    report.unavailable += 1;
                }
            }
        }

        let retention = window(self.config.history_retention_days);
        match self.history.prune(retention).await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => tracing::warn!(error = %e, "Failed to prune price history"),
        }

        report
    }

    /// Starts a background task refreshing `watchlist` every `interval`
    pub fn spawn_refresh_task(self: &Arc<Self>, watchlist: Vec<String>, interval: Duration) -> JoinHandle<()> {
        let resolver = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!(
                subjects = watchlist.len(),
                refresh_interval_secs = interval.as_secs(),
                "Starting price refresh task"
            );

            loop {
                let report = resolver.refresh_watchlist(&watchlist).await;
                tracing::info!(
                    refreshed = report.refreshed,
                    unavailable = report.unavailable,
                    pruned = report.pruned,
                    "Price refresh cycle finished"
                );

                sleep(interval).await;
            }
        })
    }

    /// Gets per-strategy metrics including latency percentiles and success rates
    pub async fn strategy_metrics(&self) -> Vec<StrategyMetrics> {
        self.metrics.snapshot().await
    }

    /// Drops the cached quote of a subject
    pub async fn invalidate_cache(&self, subject_name: &str) -> bool {
        let subject = self.catalog.lookup(subject_name);
        self.cache.invalidate(&subject.key()).await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub fn token_status(&self) -> Option<TokenStatus> {
        self.auth.as_ref().map(|auth| auth.status())
    }

    /// Perform a health check on the resolver
    ///
    /// # Returns
    /// ComponentHealth indicating the status of the resolver and its components
    pub async fn health_check(&self) -> ComponentHealth {
        let mut details = HashMap::new();

        let database_ok = match self.history.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Historical store health check failed");
                false
            }
        };
        details.insert("database".to_string(), serde_json::json!(database_ok));

        details.insert(
            "cached_quotes".to_string(),
            serde_json::json!(self.cache.len().await),
        );

        let strategy_count = self.selector.strategies().len();
        details.insert("strategies".to_string(), serde_json::json!(strategy_count));

        let penalties: HashMap<_, _> = self
            .governor
            .active_penalties()
            .await
            .into_iter()
            .map(|(id, left)| (id.as_str(), left.as_millis() as u64))
            .collect();
        details.insert("penalties_ms".to_string(), serde_json::json!(penalties));

        let metrics = self.strategy_metrics().await;
        let failing: Vec<_> = metrics
            .iter()
            .filter(|m| m.total_requests > 0 && m.success_rate < 0.5)
            .map(|m| m.strategy_id.as_str())
            .collect();
        details.insert("metrics".to_string(), serde_json::json!(metrics));

        if let Some(token) = self.token_status() {
            details.insert("auth_token".to_string(), serde_json::json!(token));
        }

        let status = if !database_ok || strategy_count == 0 {
            HealthStatus::Unhealthy
        } else if !penalties.is_empty() || !failing.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let message = match status {
            HealthStatus::Healthy => "Price resolver is operational".to_string(),
            HealthStatus::Degraded => format!(
                "Price resolver is degraded: {} strategies backing off, {} mostly failing",
                penalties.len(),
                failing.len()
            ),
            HealthStatus::Unhealthy if !database_ok => {
                "Price resolver cannot reach its historical store".to_string()
            }
            HealthStatus::Unhealthy => "Price resolver has no strategies configured".to_string(),
        };

        ComponentHealth {
            name: "price_resolver".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: self.clock.now(),
        }
    }
}

fn window(days: i64) -> Duration {
    DAY * u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::mock::CountingTokenSource;
    use crate::catalog::{CatalogEntry, SubjectKind};
    use crate::clock::ManualClock;
    use crate::error::StrategyFailure;
    use crate::governor::GovernorConfig;
    use crate::strategy::mock::MockStrategy;
    use crate::types::{AuthToken, StrategyId};
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use rust_decimal::Decimal;

    const TIMEOUT: Duration = Duration::from_secs(10);

    struct Harness {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        resolver: PriceResolver,
    }

    fn test_config(dir: &tempfile::TempDir) -> ResolverConfig {
        ResolverConfig {
            database_url: format!("sqlite://{}", dir.path().join("history.db").display()),
            token_file: None,
            governor: GovernorConfig {
                min_interval: Duration::from_millis(50),
                penalty_base: Duration::from_secs(2),
                penalty_cap: Duration::from_secs(5),
            },
            pacing_min: Duration::ZERO,
            pacing_max: Duration::ZERO,
            shuffle_strategies: false,
            ..ResolverConfig::default()
        }
    }

    async fn harness(strategies: Vec<Arc<dyn TransportStrategy>>) -> Harness {
        harness_with(strategies, |builder| builder).await
    }

    async fn harness_with(
        strategies: Vec<Arc<dyn TransportStrategy>>,
        customize: impl FnOnce(ResolverBuilder) -> ResolverBuilder,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let builder = PriceResolver::builder(test_config(&dir))
            .clock(clock.clone())
            .strategies(strategies);
        let resolver = customize(builder).build().await.unwrap();
        Harness {
            _dir: dir,
            clock,
            resolver,
        }
    }

    impl Harness {
        async fn seed_history(&self, name: &str, price: Decimal, days_ago: i64) {
            let quote = PriceQuote::new(
                name,
                price,
                Currency::Ton,
                self.clock.now() - TimeDelta::days(days_ago),
                QuoteSource::Live(StrategyId::new("tonnel_search")),
            )
            .unwrap();
            self.resolver.history.record(&quote).await.unwrap();
        }
    }

    fn failing(id: &'static str, failure: StrategyFailure) -> Arc<MockStrategy> {
        Arc::new(MockStrategy::new(id).always_fail(failure))
    }

    fn pricing(id: &'static str, price: Decimal) -> Arc<MockStrategy> {
        Arc::new(MockStrategy::new(id).always_price(price))
    }

    /// Strategy that never answers in time
    struct HangingStrategy;

    #[async_trait]
    impl TransportStrategy for HangingStrategy {
        fn id(&self) -> StrategyId {
            StrategyId::new("tonnel_search")
        }

        async fn attempt(
            &self,
            _subject: &Subject,
            _auth: Option<&AuthToken>,
        ) -> Result<PriceQuote, StrategyFailure> {
            sleep(Duration::from_secs(3600)).await;
            Err(StrategyFailure::server("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_rate_limited_strategy_falls_through_to_next() {
        let tonnel = failing("tonnel_search", StrategyFailure::rate_limited("HTTP 429"));
        let charts = pricing("giftcharts", Decimal::new(197, 2));
        let catalog = SubjectCatalog::default().with_entry(CatalogEntry {
            strategies: Some(vec!["tonnel_search".into(), "giftcharts".into()]),
            ..CatalogEntry::new("Happy Brownie", SubjectKind::Gift)
        });
        let h = harness_with(vec![tonnel.clone(), charts.clone()], |builder| builder.catalog(catalog)).await;

        let quote = h.resolver.get_price("Happy Brownie", false, TIMEOUT).await.unwrap();

        assert_eq!(quote.price_amount(), Decimal::new(197, 2));
        assert_eq!(quote.source(), QuoteSource::Live(charts.id()));
        assert_eq!(tonnel.call_count(), 1);
        assert!(h.resolver.governor.penalty_remaining(tonnel.id()).await > Duration::ZERO);
        assert_eq!(h.resolver.governor.penalty_remaining(charts.id()).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_live_quote_is_recorded_on_the_injected_day() {
        let tonnel = pricing("tonnel_search", Decimal::new(42, 1));
        let h = harness(vec![tonnel]).await;
        h.clock.advance(TimeDelta::days(10));

        let quote = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.obtained_at(), h.clock.now());

        let record = h
            .resolver
            .history
            .most_recent("Lol Pop", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.recorded_at.date_naive(), h.clock.now().date_naive());
        assert_eq!(record.recorded_at.timestamp_millis(), h.clock.now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let tonnel = pricing("tonnel_search", Decimal::new(42, 1));
        let h = harness(vec![tonnel.clone()]).await;

        let first = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        h.clock.advance(TimeDelta::minutes(9));
        let second = h.resolver.get_price("lol_pop", false, TIMEOUT).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(tonnel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_force_fresh_and_expiry_skip_cache() {
        let tonnel = pricing("tonnel_search", Decimal::new(42, 1));
        let h = harness(vec![tonnel.clone()]).await;

        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        h.resolver.get_price("Lol Pop", true, TIMEOUT).await.unwrap();
        assert_eq!(tonnel.call_count(), 2);

        h.clock.advance(TimeDelta::minutes(11));
        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(tonnel.call_count(), 3);
    }

    #[tokio::test]
    async fn test_consecutive_calls_respect_min_interval() {
        let tonnel = pricing("tonnel_search", Decimal::ONE);
        let h = harness(vec![tonnel.clone()]).await;

        let start = Instant::now();
        h.resolver.get_price("Lol Pop", true, TIMEOUT).await.unwrap();
        h.resolver.get_price("Lol Pop", true, TIMEOUT).await.unwrap();

        assert_eq!(tonnel.call_count(), 2);
        assert!(Instant::now() - start >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_live_quote_is_recorded() {
        let tonnel = pricing("tonnel_search", Decimal::new(305, 2));
        let h = harness(vec![tonnel]).await;

        h.resolver.get_price("Jelly Bunny", false, TIMEOUT).await.unwrap();

        let record = h
            .resolver
            .history
            .most_recent("jelly bunny", DAY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.price_amount, Decimal::new(305, 2));
        assert_eq!(record.source_strategy_id, "tonnel_search");
    }

    #[tokio::test]
    async fn test_recent_history_when_live_fails() {
        let tonnel = failing("tonnel_search", StrategyFailure::server("HTTP 502"));
        let h = harness(vec![tonnel.clone()]).await;
        h.seed_history("Lol Pop", Decimal::new(29, 1), 3).await;

        let quote = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.source(), QuoteSource::HistoricalRecent);
        assert_eq!(quote.price_amount(), Decimal::new(29, 1));

        // Cached for the short historical TTL only
        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(tonnel.call_count(), 1);

        h.clock.advance(TimeDelta::minutes(3));
        let again = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(again.source(), QuoteSource::HistoricalRecent);
        assert_eq!(tonnel.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recent_history_wins_over_older_rows() {
        let tonnel = failing("tonnel_search", StrategyFailure::permanent("not found"));
        let h = harness(vec![tonnel]).await;
        h.seed_history("Lol Pop", Decimal::new(25, 1), 20).await;
        h.seed_history("Lol Pop", Decimal::new(29, 1), 6).await;

        let quote = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.source(), QuoteSource::HistoricalRecent);
        assert_eq!(quote.price_amount(), Decimal::new(29, 1));
    }

    #[tokio::test]
    async fn test_stale_history_is_marked_and_not_cached() {
        let tonnel = failing("tonnel_search", StrategyFailure::server("HTTP 503"));
        let h = harness(vec![tonnel.clone()]).await;
        h.seed_history("Lol Pop", Decimal::new(25, 1), 12).await;

        let quote = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.source(), QuoteSource::HistoricalStale);

        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(tonnel.call_count(), 2);
    }

    #[tokio::test]
    async fn test_history_past_loose_window_is_unavailable() {
        let tonnel = failing("tonnel_search", StrategyFailure::server("HTTP 503"));
        let h = harness(vec![tonnel]).await;
        h.seed_history("Lol Pop", Decimal::new(25, 1), 31).await;

        let err = h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap_err();
        assert_eq!(err, Unavailable::no_price_data("Lol Pop"));
    }

    #[tokio::test]
    async fn test_unknown_everywhere_is_unavailable() {
        let tonnel = failing("tonnel_search", StrategyFailure::permanent("not found"));
        let charts = failing("giftcharts", StrategyFailure::permanent("not found"));
        let h = harness(vec![tonnel, charts]).await;

        let err = h.resolver.get_price("No Such Gift", false, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Unavailable::NoPriceData { .. }));
        assert_eq!(err.subject(), "No Such Gift");
    }

    #[tokio::test]
    async fn test_auth_error_refreshes_token_on_next_call() {
        let source = Arc::new(CountingTokenSource::default());
        let portal = Arc::new(
            MockStrategy::new("portal_search")
                .with_auth()
                .then(Err(StrategyFailure::auth("HTTP 401")))
                .always_price(Decimal::new(31, 1)),
        );
        let auth_source = source.clone();
        let h = harness_with(vec![portal.clone()], move |builder| {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            builder.auth(Arc::new(AuthTokenManager::new(auth_source, clock)))
        })
        .await;

        h.resolver.get_price("Plush Pepe", false, TIMEOUT).await.unwrap_err();
        assert_eq!(source.calls(), 1);

        let quote = h.resolver.get_price("Jelly Bunny", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.price_amount(), Decimal::new(31, 1));
        assert_eq!(source.calls(), 2);
        assert_eq!(
            portal.tokens_seen(),
            vec![Some("token-1".to_string()), Some("token-2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_premarket_subjects_use_their_strategy_set() {
        let tonnel = pricing("tonnel_search", Decimal::new(197, 2));
        let charts = pricing("giftcharts", Decimal::TEN);
        let h = harness(vec![charts.clone(), tonnel.clone()]).await;

        let quote = h.resolver.get_price("Happy_Brownie", false, TIMEOUT).await.unwrap();

        assert_eq!(quote.subject_name(), "Happy Brownie");
        assert_eq!(quote.price_amount(), Decimal::new(197, 2));
        assert_eq!(charts.call_count(), 0);
    }

    #[tokio::test]
    async fn test_catalog_entries_restrict_strategies() {
        let catalog = SubjectCatalog::default()
            .extend_from_json(
                r#"{"subjects": [{"name": "Blue Pengu", "kind": "sticker", "collection": "Pudgy Penguins"}]}"#,
            )
            .unwrap();
        let tonnel = pricing("tonnel_search", Decimal::ONE);
        let stickers = pricing("stickers_tools", Decimal::new(125, 1));
        let h = harness_with(vec![tonnel.clone(), stickers], |builder| builder.catalog(catalog)).await;

        let quote = h.resolver.get_price("blue pengu", false, TIMEOUT).await.unwrap();
        assert_eq!(quote.price_amount(), Decimal::new(125, 1));
        assert_eq!(tonnel.call_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_returns_unavailable() {
        let h = harness(vec![Arc::new(HangingStrategy)]).await;

        let err = h
            .resolver
            .get_price("Lol Pop", false, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, Unavailable::timed_out("Lol Pop", Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_get_price_in_usd() {
        let tonnel = pricing("tonnel_search", Decimal::new(2, 0));
        let h = harness(vec![tonnel]).await;
        h.resolver.ton_usd().update(Decimal::new(325, 2)).await;

        let quote = h
            .resolver
            .get_price_in("Lol Pop", Currency::Usd, false, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(quote.price_currency(), Currency::Usd);
        assert_eq!(quote.price_amount(), Decimal::new(65, 1));

        let ton = h
            .resolver
            .get_price_in("Lol Pop", Currency::Ton, false, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(ton.price_amount(), Decimal::new(2, 0));
    }

    #[tokio::test]
    async fn test_invalidate_cache() {
        let tonnel = pricing("tonnel_search", Decimal::ONE);
        let h = harness(vec![tonnel.clone()]).await;

        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert!(h.resolver.invalidate_cache("LOL POP").await);
        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap();
        assert_eq!(tonnel.call_count(), 2);

        h.resolver.clear_cache().await;
        assert!(!h.resolver.invalidate_cache("Lol Pop").await);
    }

    #[tokio::test]
    async fn test_refresh_watchlist_records_and_prunes() {
        let tonnel = pricing("tonnel_search", Decimal::new(15, 1));
        let h = harness(vec![tonnel.clone()]).await;
        h.seed_history("Old Gift", Decimal::ONE, 120).await;

        let report = h.resolver.refresh_watchlist(&["Lol Pop".to_string()]).await;

        assert_eq!(
            report,
            RefreshReport {
                refreshed: 1,
                unavailable: 0,
                pruned: 1
            }
        );
        assert_eq!(tonnel.call_count(), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_penalties() {
        let tonnel = failing("tonnel_search", StrategyFailure::rate_limited("HTTP 429"));
        let h = harness(vec![tonnel]).await;

        let health = h.resolver.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);

        h.resolver.get_price("Lol Pop", false, TIMEOUT).await.unwrap_err();
        let health = h.resolver.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.details["penalties_ms"]["tonnel_search"].as_u64().unwrap() > 0);

        let metrics = h.resolver.strategy_metrics().await;
        assert_eq!(metrics[0].last_error_kind, Some(ErrorKind::RateLimited));
    }
}
