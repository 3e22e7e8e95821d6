//! Auth token management for authenticated upstreams
//!
//! [`AuthTokenManager`] hands out a cached [`AuthToken`] while it is comfortably
//! inside its lifetime and refreshes it through a [`TokenSource`] otherwise.
//! The whole check-and-refresh runs under one async mutex, so concurrent
//! callers that find no usable token share a single refresh. Refreshed tokens
//! are persisted to a JSON file and picked up again after a restart.

use crate::{
    clock::Clock,
    constants::{TOKEN_GRACE_SECS, TOKEN_TTL_SECS},
    error::AuthFailure,
    types::AuthToken,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Produces fresh token values
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtains a new raw token value from the upstream
    async fn fetch_token(&self) -> Result<String, AuthFailure>;
}

/// Token source backed by Telegram WebApp init data
///
/// Portal accepts the init data itself as a `tma` authorization value.
pub struct InitDataTokenSource {
    init_data: String,
}

impl InitDataTokenSource {
    pub fn new(init_data: impl Into<String>) -> Self {
        Self {
            init_data: init_data.into(),
        }
    }
}

#[async_trait]
impl TokenSource for InitDataTokenSource {
    async fn fetch_token(&self) -> Result<String, AuthFailure> {
        let init_data = self.init_data.trim();
        if init_data.is_empty() {
            return Err(AuthFailure::Refresh(
                "no Telegram init data configured".to_string(),
            ));
        }
        Ok(format!("tma {init_data}"))
    }
}

/// JSON file holding the last issued token
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted token, `None` if the file does not exist
    pub async fn load(&self) -> Result<Option<AuthToken>, AuthFailure> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes the token next to the target and renames it into place
    pub async fn save(&self, token: &AuthToken) -> Result<(), AuthFailure> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(token)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Snapshot of the manager's token for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    /// A refresh is in flight and the state could not be inspected
    pub refreshing: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the cached token would be handed out without a refresh
    pub usable: bool,
}

#[derive(Debug, Default)]
struct TokenState {
    cached: Option<AuthToken>,
    /// The token file has been consulted (or deliberately skipped)
    loaded: bool,
}

/// Owns the auth token of one upstream
pub struct AuthTokenManager {
    source: Arc<dyn TokenSource>,
    file: Option<TokenFile>,
    clock: Arc<dyn Clock>,
    ttl_seconds: u64,
    grace: TimeDelta,
    state: Mutex<TokenState>,
}

impl AuthTokenManager {
    /// Creates a manager with the default token lifetime and no persistence
    pub fn new(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            file: None,
            clock,
            ttl_seconds: TOKEN_TTL_SECS,
            grace: TimeDelta::seconds(TOKEN_GRACE_SECS as i64),
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn with_token_file(mut self, file: TokenFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Overrides the lifetime given to fresh tokens and the refresh margin
    pub fn with_lifetime(mut self, ttl_seconds: u64, grace_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self.grace = i64::try_from(grace_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self
    }

    /// Returns a usable token, refreshing it if needed
    ///
    /// Concurrent callers wait for one shared refresh instead of starting
    /// their own.
    pub async fn get_token(&self) -> Result<AuthToken, AuthFailure> {
        let mut state = self.state.lock().await;

        if !state.loaded {
            state.loaded = true;
            state.cached = self.load_persisted().await;
        }

        if let Some(token) = &state.cached {
            if token.is_usable(self.clock.now(), self.grace) {
                return Ok(token.clone());
            }
            tracing::debug!(expires_at = %token.expires_at(), "Auth token near expiry, refreshing");
        }

        state.cached = None;
        let token = self.refresh().await?;
        state.cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token so the next `get_token` refreshes
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.cached.take().is_some() {
            tracing::info!("Auth token invalidated");
        }
        // An invalidated token must not come back from the file either
        state.loaded = true;
    }

    pub fn status(&self) -> TokenStatus {
        let Ok(state) = self.state.try_lock() else {
            return TokenStatus {
                refreshing: true,
                issued_at: None,
                expires_at: None,
                usable: false,
            };
        };

        let token = state.cached.as_ref();
        TokenStatus {
            refreshing: false,
            issued_at: token.map(AuthToken::issued_at),
            expires_at: token.map(AuthToken::expires_at),
            usable: token.is_some_and(|t| t.is_usable(self.clock.now(), self.grace)),
        }
    }

    async fn load_persisted(&self) -> Option<AuthToken> {
        let file = self.file.as_ref()?;
        match file.load().await {
            Ok(Some(token)) => {
                tracing::debug!(
                    path = %file.path().display(),
                    issued_at = %token.issued_at(),
                    "Loaded persisted auth token"
                );
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(path = %file.path().display(), error = %e, "Ignoring unreadable token file");
                None
            }
        }
    }

    async fn refresh(&self) -> Result<AuthToken, AuthFailure> {
        tracing::info!("Refreshing auth token");

        let value = self.source.fetch_token().await.map_err(|e| {
            tracing::warn!(error = %e, "Auth token refresh failed");
            e
        })?;
        if value.trim().is_empty() {
            return Err(AuthFailure::EmptyToken);
        }

        let token = AuthToken::new(value, self.clock.now(), self.ttl_seconds);

        if let Some(file) = &self.file {
            if let Err(e) = file.save(&token).await {
                tracing::warn!(path = %file.path().display(), error = %e, "Failed to persist auth token");
            }
        }

        Ok(token)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::CountingTokenSource;
    use super::*;
    use crate::clock::ManualClock;
    use futures::future::join_all;
    use std::time::Duration;

    fn manager(source: Arc<CountingTokenSource>, clock: Arc<ManualClock>) -> AuthTokenManager {
        AuthTokenManager::new(source, clock)
    }

    #[tokio::test]
    async fn test_init_data_source_formats_tma_value() {
        let source = InitDataTokenSource::new(" query_id=AAH&user=%7B%7D ");
        assert_eq!(source.fetch_token().await.unwrap(), "tma query_id=AAH&user=%7B%7D");

        let empty = InitDataTokenSource::new("  ");
        assert!(matches!(empty.fetch_token().await, Err(AuthFailure::Refresh(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let source = Arc::new(CountingTokenSource::slow(Duration::from_millis(500)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source.clone(), clock);

        let tokens = join_all((0..16).map(|_| manager.get_token())).await;

        assert_eq!(source.calls(), 1);
        for token in tokens {
            assert_eq!(token.unwrap().value(), "token-1");
        }
    }

    #[tokio::test]
    async fn test_token_reused_until_grace_window() {
        let source = Arc::new(CountingTokenSource::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source.clone(), clock.clone());

        assert_eq!(manager.get_token().await.unwrap().value(), "token-1");

        // 1920 s lifetime minus 300 s grace
        clock.advance(TimeDelta::seconds(1619));
        assert_eq!(manager.get_token().await.unwrap().value(), "token-1");

        clock.advance(TimeDelta::seconds(2));
        assert_eq!(manager.get_token().await.unwrap().value(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_one_refresh() {
        let source = Arc::new(CountingTokenSource::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source.clone(), clock);

        manager.get_token().await.unwrap();
        manager.invalidate().await;

        assert_eq!(manager.get_token().await.unwrap().value(), "token-2");
        assert_eq!(manager.get_token().await.unwrap().value(), "token-2");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let source = Arc::new(CountingTokenSource::failing());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source.clone(), clock);

        assert!(matches!(manager.get_token().await, Err(AuthFailure::Refresh(_))));
        assert!(!manager.status().usable);
    }

    #[tokio::test]
    async fn test_persisted_token_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens").join("portal.json");
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let first = Arc::new(CountingTokenSource::default());
        let issued = manager(first.clone(), clock.clone())
            .with_token_file(TokenFile::new(&path))
            .get_token()
            .await
            .unwrap();
        assert!(path.exists());

        let second = Arc::new(CountingTokenSource::default());
        let restarted = manager(second.clone(), clock.clone()).with_token_file(TokenFile::new(&path));
        assert_eq!(restarted.get_token().await.unwrap(), issued);
        assert_eq!(second.calls(), 0);

        // Past its lifetime the persisted token is replaced and rewritten
        clock.advance(TimeDelta::seconds(1800));
        assert_eq!(restarted.get_token().await.unwrap().value(), "token-1");
        assert_eq!(second.calls(), 1);
        let on_disk = TokenFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(on_disk.value(), "token-1");
        assert_eq!(on_disk.issued_at(), clock.now());
    }

    #[tokio::test]
    async fn test_corrupt_token_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let source = Arc::new(CountingTokenSource::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source.clone(), clock).with_token_file(TokenFile::new(&path));

        assert_eq!(manager.get_token().await.unwrap().value(), "token-1");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_cached_token() {
        let source = Arc::new(CountingTokenSource::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(source, clock.clone());

        assert_eq!(manager.status().issued_at, None);

        manager.get_token().await.unwrap();
        let status = manager.status();
        assert!(status.usable);
        assert!(!status.refreshing);
        assert_eq!(status.issued_at, Some(clock.now()));
    }
}
