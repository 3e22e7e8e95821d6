//! Durable price history
//!
//! One row per subject and UTC calendar day. Every successful live fetch
//! upserts the day's row, so the newest quote of the day wins and
//! `success_count` counts how many fetches were folded into it. The resolver
//! falls back to these rows when no live strategy can price a subject.

use crate::{
    catalog::normalize_name,
    clock::Clock,
    error::StoreError,
    types::{Currency, HistoricalPriceRecord, PriceQuote, QuoteSource},
};
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject_key TEXT NOT NULL,
        subject_name TEXT NOT NULL,
        day TEXT NOT NULL,
        price_amount TEXT NOT NULL,
        price_currency TEXT NOT NULL,
        recorded_at_ms INTEGER NOT NULL,
        source_strategy_id TEXT NOT NULL,
        success_count INTEGER NOT NULL DEFAULT 1,
        UNIQUE (subject_key, day)
    )
"#;

const CREATE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_price_history_recent
    ON price_history (subject_key, recorded_at_ms DESC)
"#;

/// SQLite-backed history of resolved prices
pub struct HistoricalStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl HistoricalStore {
    /// Opens (creating if needed) the database at `database_url` and ensures
    /// the schema exists
    ///
    /// # Example
    /// ```no_run
    /// # use gift_price_resolver::{clock::SystemClock, history::HistoricalStore};
    /// # use std::sync::Arc;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = HistoricalStore::connect("sqlite://sqlite_data/historical_prices.db", Arc::new(SystemClock)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let filename = options.get_filename();
        if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
            if filename.as_os_str() != ":memory:" {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;

        tracing::info!(database_url, "Historical price store ready");
        Ok(Self { pool, clock })
    }

    /// Upserts the day's row for the quote's subject
    pub async fn record(&self, quote: &PriceQuote) -> Result<(), StoreError> {
        let source = match quote.source() {
            QuoteSource::Live(id) => id.as_str().to_string(),
            other => other.to_string(),
        };
        let recorded_at = quote.obtained_at();

        sqlx::query(
            r#"
            INSERT INTO price_history (
                subject_key, subject_name, day, price_amount, price_currency,
                recorded_at_ms, source_strategy_id, success_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT (subject_key, day) DO UPDATE SET
                subject_name = excluded.subject_name,
                price_amount = excluded.price_amount,
                price_currency = excluded.price_currency,
                recorded_at_ms = excluded.recorded_at_ms,
                source_strategy_id = excluded.source_strategy_id,
                success_count = price_history.success_count + 1
            WHERE excluded.recorded_at_ms >= price_history.recorded_at_ms
            "#,
        )
        .bind(normalize_name(quote.subject_name()))
        .bind(quote.subject_name())
        .bind(recorded_at.format("%Y-%m-%d").to_string())
        .bind(quote.price_amount().to_string())
        .bind(quote.price_currency().symbol())
        .bind(recorded_at.timestamp_millis())
        .bind(source)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            subject = quote.subject_name(),
            price = %quote.price_amount(),
            "Recorded price history"
        );
        Ok(())
    }

    /// Newest record of `subject` that is at most `max_age` old
    pub async fn most_recent(
        &self,
        subject: &str,
        max_age: Duration,
    ) -> Result<Option<HistoricalPriceRecord>, StoreError> {
        let cutoff = self.cutoff(max_age);

        let row = sqlx::query(
            r#"
            SELECT subject_name, price_amount, price_currency, recorded_at_ms,
                   source_strategy_id, success_count
            FROM price_history
            WHERE subject_key = ? AND recorded_at_ms >= ?
            ORDER BY recorded_at_ms DESC
            LIMIT 1
            "#,
        )
        .bind(normalize_name(subject))
        .bind(cutoff.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Deletes rows older than `older_than`, returning how many were removed
    pub async fn prune(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = self.cutoff(older_than);
        let result = sqlx::query("DELETE FROM price_history WHERE recorded_at_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Pruned price history");
        }
        Ok(deleted)
    }

    /// Checks that the database answers
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn cutoff(&self, age: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        TimeDelta::from_std(age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<HistoricalPriceRecord, StoreError> {
    let raw_price: String = row.try_get("price_amount")?;
    let price_amount =
        Decimal::from_str(&raw_price).map_err(|_| StoreError::InvalidPrice(raw_price.clone()))?;

    let raw_currency: String = row.try_get("price_currency")?;
    let price_currency = match raw_currency.as_str() {
        "TON" => Currency::Ton,
        "USD" => Currency::Usd,
        other => return Err(StoreError::CorruptRow(format!("unknown currency {other}"))),
    };

    let recorded_at_ms: i64 = row.try_get("recorded_at_ms")?;
    let recorded_at = DateTime::<Utc>::from_timestamp_millis(recorded_at_ms)
        .ok_or_else(|| StoreError::CorruptRow(format!("timestamp {recorded_at_ms} out of range")))?;

    Ok(HistoricalPriceRecord {
        subject_name: row.try_get("subject_name")?,
        price_amount,
        price_currency,
        recorded_at,
        source_strategy_id: row.try_get("source_strategy_id")?,
        success_count: row.try_get("success_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::StrategyId;
    use chrono::TimeZone;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        store: HistoricalStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("data").join("history.db").display());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let store = HistoricalStore::connect(&url, clock.clone()).await.unwrap();
        Fixture {
            _dir: dir,
            clock,
            store,
        }
    }

    fn quote(clock: &ManualClock, name: &str, price: Decimal) -> PriceQuote {
        PriceQuote::new(
            name,
            price,
            Currency::Ton,
            clock.now(),
            QuoteSource::Live(StrategyId::new("tonnel_search")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_latest_quote_of_the_day_wins() {
        let f = fixture().await;

        f.store.record(&quote(&f.clock, "Happy Brownie", Decimal::new(210, 2))).await.unwrap();
        f.clock.advance(TimeDelta::hours(3));
        f.store.record(&quote(&f.clock, "Happy Brownie", Decimal::new(197, 2))).await.unwrap();

        let record = f.store.most_recent("happy_brownie", DAY).await.unwrap().unwrap();
        assert_eq!(record.price_amount, Decimal::new(197, 2));
        assert_eq!(record.success_count, 2);
        assert_eq!(record.source_strategy_id, "tonnel_search");
        assert_eq!(record.recorded_at, f.clock.now());
    }

    #[tokio::test]
    async fn test_each_day_keeps_its_own_row() {
        let f = fixture().await;

        f.store.record(&quote(&f.clock, "Lol Pop", Decimal::new(29, 1))).await.unwrap();
        f.clock.advance(TimeDelta::days(1));
        f.store.record(&quote(&f.clock, "Lol Pop", Decimal::new(31, 1))).await.unwrap();

        let record = f.store.most_recent("Lol Pop", 7 * DAY).await.unwrap().unwrap();
        assert_eq!(record.price_amount, Decimal::new(31, 1));
        assert_eq!(record.success_count, 1);
    }

    #[tokio::test]
    async fn test_most_recent_respects_max_age() {
        let f = fixture().await;

        f.store.record(&quote(&f.clock, "Lol Pop", Decimal::new(29, 1))).await.unwrap();
        f.clock.advance(TimeDelta::days(10));

        assert!(f.store.most_recent("Lol Pop", 7 * DAY).await.unwrap().is_none());
        let stale = f.store.most_recent("Lol Pop", 30 * DAY).await.unwrap().unwrap();
        assert_eq!(stale.price_amount, Decimal::new(29, 1));
        assert!(f.store.most_recent("Jelly Bunny", 30 * DAY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_drops_old_rows() {
        let f = fixture().await;

        f.store.record(&quote(&f.clock, "Lol Pop", Decimal::ONE)).await.unwrap();
        f.clock.advance(TimeDelta::days(100));
        f.store.record(&quote(&f.clock, "Jelly Bunny", Decimal::TWO)).await.unwrap();

        assert_eq!(f.store.prune(90 * DAY).await.unwrap(), 1);
        assert!(f.store.most_recent("Lol Pop", 365 * DAY).await.unwrap().is_none());
        assert!(f.store.most_recent("Jelly Bunny", DAY).await.unwrap().is_some());
        f.store.ping().await.unwrap();
    }
}
