use crate::rate_limit::RateLimitPolicy;
use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counter row for one rate-limit bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketState {
    /// Requests counted in the current window, including this one.
    pub request_count: u32,
    /// Limit of the policy that last touched the bucket.
    pub limit: u32,
    /// Window length the bucket was opened with.
    pub window_seconds: u64,
    /// Start of the current window.
    pub window_started_at: DateTime<Utc>,
    /// First instant at which the window counts as over.
    pub window_expires_at: DateTime<Utc>,
}

impl BucketState {
    fn fresh(policy: RateLimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            request_count: 1,
            limit: policy.limit,
            window_seconds: policy.window_seconds,
            window_started_at: now,
            window_expires_at: now + window(policy),
        }
    }
}

// Ten years; keeps window arithmetic on `DateTime` from overflowing.
const MAX_WINDOW_SECONDS: i64 = 315_360_000;

fn window(policy: RateLimitPolicy) -> Duration {
    Duration::seconds(
        i64::try_from(policy.window_seconds)
            .unwrap_or(MAX_WINDOW_SECONDS)
            .min(MAX_WINDOW_SECONDS),
    )
}

/// Durable counter backend for the rate limiter.
///
/// `increment` must be atomic per key: a new bucket starts at 1, an expired
/// window (`now >= window_expires_at`) resets to 1 with a fresh window, and
/// anything else increments in place. Returns the post-increment row.
#[async_trait]
pub trait RateLimitCounterStore: Send + Sync {
    /// Count one request against `bucket_key` at `now`.
    async fn increment(
        &self,
        bucket_key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> CadenceResult<BucketState>;
}

/// How often `increment` sweeps expired buckets out of the in-memory map.
pub const SWEEP_INTERVAL_SECONDS: i64 = 60;

#[derive(Default)]
struct Buckets {
    map: HashMap<String, BucketState>,
    last_sweep: Option<DateTime<Utc>>,
}

impl Buckets {
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.map.len();
        self.map.retain(|_, b| now < b.window_expires_at);
        self.last_sweep = Some(now);
        before - self.map.len()
    }

    fn sweep_due(&self, now: DateTime<Utc>) -> bool {
        self.last_sweep.map_or(true, |last| {
            now - last >= Duration::seconds(SWEEP_INTERVAL_SECONDS)
        })
    }
}

/// Process-local counter store. Atomic within one process only.
///
/// Expired buckets are reclaimed by `increment` itself, at most once every
/// [`SWEEP_INTERVAL_SECONDS`], so one-off client keys do not accumulate.
pub struct InMemoryCounterStore {
    buckets: Mutex<Buckets>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Buckets::default()),
        }
    }

    /// Drop buckets whose window has ended.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        self.buckets.lock().await.sweep(now)
    }

    /// Number of live buckets.
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.map.len()
    }

    /// Whether no bucket is held.
    pub async fn is_empty(&self) -> bool {
        self.buckets.lock().await.map.is_empty()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitCounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        bucket_key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> CadenceResult<BucketState> {
        let mut buckets = self.buckets.lock().await;
        if buckets.sweep_due(now) {
            let removed = buckets.sweep(now);
            if removed > 0 {
                tracing::debug!(removed, "Reclaimed expired rate-limit buckets");
            }
        }
        let bucket = buckets
            .map
            .entry(bucket_key.to_string())
            .and_modify(|b| {
                if now >= b.window_expires_at {
                    *b = BucketState::fresh(policy, now);
                } else {
                    b.request_count = b.request_count.saturating_add(1);
                    b.limit = policy.limit;
                }
            })
            .or_insert_with(|| BucketState::fresh(policy, now));
        Ok(bucket.clone())
    }
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS rate_limit_buckets (
    bucket_key TEXT PRIMARY KEY NOT NULL,
    request_count INTEGER NOT NULL,
    limit_value INTEGER NOT NULL,
    window_seconds INTEGER NOT NULL,
    window_started_at INTEGER NOT NULL,
    window_expires_at INTEGER NOT NULL
);
"#;

// One statement, so the expiry check and the increment cannot interleave with
// another writer. SET expressions all read the pre-update row.
const UPSERT: &str = r#"
INSERT INTO rate_limit_buckets AS b
    (bucket_key, request_count, limit_value, window_seconds, window_started_at, window_expires_at)
VALUES (?1, 1, ?2, ?3, ?4, ?5)
ON CONFLICT(bucket_key) DO UPDATE SET
    request_count = CASE
        WHEN excluded.window_started_at >= b.window_expires_at THEN 1
        ELSE b.request_count + 1
    END,
    window_started_at = CASE
        WHEN excluded.window_started_at >= b.window_expires_at THEN excluded.window_started_at
        ELSE b.window_started_at
    END,
    window_expires_at = CASE
        WHEN excluded.window_started_at >= b.window_expires_at THEN excluded.window_expires_at
        ELSE b.window_expires_at
    END,
    limit_value = excluded.limit_value,
    window_seconds = excluded.window_seconds
RETURNING request_count, limit_value, window_seconds, window_started_at, window_expires_at
"#;

/// SQLite-backed counter store. Several processes may share one database file.
pub struct SqliteCounterStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCounterStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> CadenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(store_err)?;
            Self::init(&conn)?;
            Ok::<_, CadenceError>(conn)
        })
        .await
        .map_err(|e| CadenceError::Store(format!("Task join error: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> CadenceResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> CadenceResult<()> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Store(format!("SQLite error: {e}"))
}

fn from_millis(ms: i64) -> CadenceResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| CadenceError::Store(format!("invalid timestamp: {ms}")))
}

#[async_trait]
impl RateLimitCounterStore for SqliteCounterStore {
    async fn increment(
        &self,
        bucket_key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> CadenceResult<BucketState> {
        let conn = self.conn.clone();
        let key = bucket_key.to_string();
        let started = now.timestamp_millis();
        let expires = (now + window(policy)).timestamp_millis();

        let row = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                UPSERT,
                params![
                    key,
                    i64::from(policy.limit),
                    i64::try_from(policy.window_seconds).unwrap_or(i64::MAX),
                    started,
                    expires
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .map_err(store_err)
        })
        .await
        .map_err(|e| CadenceError::Store(format!("Task join error: {e}")))??;

        let (count, limit, window_seconds, started_at, expires_at) = row;
        Ok(BucketState {
            request_count: u32::try_from(count).unwrap_or(u32::MAX),
            limit: u32::try_from(limit).unwrap_or(u32::MAX),
            window_seconds: u64::try_from(window_seconds).unwrap_or(0),
            window_started_at: from_millis(started_at)?,
            window_expires_at: from_millis(expires_at)?,
        })
    }
}
