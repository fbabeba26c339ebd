use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use parcel_transfer::TransferKind;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const RECORD_COLUMNS: &str = "id, transfer_id, display_name, size_bytes, storage_locator, kind, expired, sent, received, received_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: i64,
    pub transfer_id: String,
    pub display_name: String,
    pub size_bytes: i64,
    pub storage_locator: String,
    pub kind: String,
    pub expired: bool,
    pub sent: bool,
    pub received: bool,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn size(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewTransferRecord {
    pub transfer_id: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub storage_locator: String,
    pub kind: TransferKind,
}

/// Persistent transfer metadata, keyed by the external transfer id.
///
/// The `mark_*` updates are single-row and conditional on the transfer id;
/// they report whether a row matched.
#[async_trait]
pub trait TransferRecordStore: Send + Sync {
    async fn create(&self, record: NewTransferRecord) -> Result<TransferRecord>;

    async fn get_by_transfer_id(&self, transfer_id: &str) -> Result<Option<TransferRecord>>;

    async fn mark_sent(&self, transfer_id: &str) -> Result<bool>;

    async fn mark_received(&self, transfer_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn mark_expired(&self, transfer_ids: &[String]) -> Result<u64>;

    async fn query_sent_today(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>>;

    async fn query_received_today(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>>;

    async fn ping(&self) -> Result<()>;
}

/// Midnight UTC of the day containing `now`. All "today" queries use UTC.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone)]
pub struct SqliteTransferStore {
    pool: SqlitePool,
}

impl SqliteTransferStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)
            .with_context(|| format!("invalid sqlite URI: {}", uri))?
            .create_if_missing(true);

        // An in-memory database lives only as long as its connection.
        let pool_options = if is_in_memory(&uri) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(&StorageConfig {
            sqlite_path: "sqlite::memory:".to_string(),
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed for statement: {sql}"))?;
        }
        info!("parcel sqlite schema ready");
        Ok(())
    }

    async fn query_flagged_since(&self, flag: &str, since: DateTime<Utc>) -> Result<Vec<TransferRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM transfers WHERE created_at >= ? AND {flag} = 1 ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, TransferRecord>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("query {flag} transfers since {since}"))
    }
}

#[async_trait]
impl TransferRecordStore for SqliteTransferStore {
    async fn create(&self, record: NewTransferRecord) -> Result<TransferRecord> {
        let now = Utc::now();
        let size_bytes = i64::try_from(record.size_bytes).context("transfer size out of range")?;

        sqlx::query(
            "INSERT INTO transfers(transfer_id, display_name, size_bytes, storage_locator, kind, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.transfer_id)
        .bind(&record.display_name)
        .bind(size_bytes)
        .bind(&record.storage_locator)
        .bind(record.kind.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert transfer {}", record.transfer_id))?;

        debug!(transfer_id = %record.transfer_id, "transfer record created");
        self.get_by_transfer_id(&record.transfer_id)
            .await?
            .context("transfer missing after insert")
    }

    async fn get_by_transfer_id(&self, transfer_id: &str) -> Result<Option<TransferRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM transfers WHERE transfer_id = ?");
        sqlx::query_as::<_, TransferRecord>(&sql)
            .bind(transfer_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("query transfer {transfer_id}"))
    }

    async fn mark_sent(&self, transfer_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transfers SET sent = 1, updated_at = ? WHERE transfer_id = ? AND sent = 0",
        )
        .bind(Utc::now())
        .bind(transfer_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("mark transfer {transfer_id} sent"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_received(&self, transfer_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transfers SET received = 1, received_at = ?, updated_at = ? WHERE transfer_id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(transfer_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("mark transfer {transfer_id} received"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_expired(&self, transfer_ids: &[String]) -> Result<u64> {
        if transfer_ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin expiry transaction")?;
        let mut updated = 0;
        for transfer_id in transfer_ids {
            let result = sqlx::query(
                "UPDATE transfers SET expired = 1, updated_at = ? WHERE transfer_id = ? AND expired = 0",
            )
            .bind(now)
            .bind(transfer_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("mark transfer {transfer_id} expired"))?;
            updated += result.rows_affected();
        }
        tx.commit().await.context("commit expiry transaction")?;
        Ok(updated)
    }

    async fn query_sent_today(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>> {
        self.query_flagged_since("sent", start_of_utc_day(now)).await
    }

    async fn query_received_today(&self, now: DateTime<Utc>) -> Result<Vec<TransferRecord>> {
        self.query_flagged_since("received", start_of_utc_day(now)).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping")?;
        Ok(())
    }
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else if raw == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{raw}")
    }
}

fn is_in_memory(uri: &str) -> bool {
    uri.contains(":memory:") || uri.contains("mode=memory")
}
