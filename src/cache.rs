//! In-memory quote cache

use crate::{catalog::normalize_name, clock::Clock, types::PriceQuote};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: PriceQuote,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Short-lived store of resolved quotes, keyed by normalized subject name
///
/// Entries expire on the injected clock, so TTL behavior is testable without
/// waiting.
pub struct QuoteCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl QuoteCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the cached quote if it is unexpired and was stored at most
    /// `max_age` ago
    ///
    /// Age counts from when the quote was cached, not from when it was
    /// obtained: a historical quote may be days old and still cacheable.
    pub async fn get_recent(&self, subject: &str, max_age: Duration) -> Option<PriceQuote> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let entry = entries.get(&normalize_name(subject))?;

        if entry.expires_at <= now {
            return None;
        }
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        (now - entry.stored_at <= max_age).then(|| entry.quote.clone())
    }

    /// Stores `quote` for `ttl`, replacing any previous entry
    pub async fn put(&self, quote: PriceQuote, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        tracing::debug!(
            subject = quote.subject_name(),
            price = %quote.price_amount(),
            source = %quote.source(),
            ttl_secs = ttl.as_secs(),
            "Caching quote"
        );

        let key = normalize_name(quote.subject_name());
        self.entries
            .write()
            .await
            .insert(
                key,
                CacheEntry {
                    quote,
                    stored_at: now,
                    expires_at,
                },
            );
    }

    pub async fn invalidate(&self, subject: &str) -> bool {
        self.entries
            .write()
            .await
            .remove(&normalize_name(subject))
            .is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of unexpired entries
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
