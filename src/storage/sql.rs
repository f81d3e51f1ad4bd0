//! Relational store on SQLite through an sqlx connection pool
//!
//! Uniqueness is enforced by the database:
//!
//! - `urls_short_code_idx`: unique short codes
//! - `urls_live_original_url_idx`: unique original URL among rows with
//!   `is_deleted = 0`, which is what makes dedup ignore soft-deleted rows
//!
//! The schema is migrated once at construction, before the pool is handed
//! out. A migration failure fails construction.
//!
//! The database is embedded, so there is no network between the store and
//! its data. `Error::Unavailable` covers what can still go wrong at that
//! level (pool exhaustion, a closed pool, file I/O), and a batch is one
//! local transaction rather than one round trip.

use crate::error::{Error, Result};
use crate::model::{NewUrl, PutOutcome, StoreStats, UrlRecord};
use crate::shortcode::CollisionPolicy;
use crate::storage::engine::UrlStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Ordered schema migrations, tracked through `PRAGMA user_version`
const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            "CREATE TABLE IF NOT EXISTS urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL,
                original_url TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS urls_short_code_idx ON urls (short_code)",
        ],
    ),
    (
        2,
        &[
            "CREATE UNIQUE INDEX IF NOT EXISTS urls_live_original_url_idx
                ON urls (original_url) WHERE is_deleted = 0",
            "CREATE INDEX IF NOT EXISTS urls_owner_idx ON urls (owner_id)",
        ],
    ),
];

const INSERT_URL: &str = "INSERT INTO urls (short_code, original_url, owner_id)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (original_url) WHERE is_deleted = 0 DO NOTHING
    RETURNING short_code";

const LIVE_CODE_FOR_URL: &str = "SELECT short_code FROM urls
    WHERE original_url = ?1 AND is_deleted = 0
    LIMIT 1";

const SELECT_BY_CODE: &str = "SELECT id, short_code, original_url, owner_id, is_deleted
    FROM urls
    WHERE short_code = ?1
    LIMIT 1";

const SELECT_BY_OWNER: &str = "SELECT id, short_code, original_url, owner_id, is_deleted
    FROM urls
    WHERE owner_id = ?1
    ORDER BY id";

const SOFT_DELETE: &str = "UPDATE urls SET is_deleted = 1
    WHERE short_code = ?1 AND owner_id = ?2 AND is_deleted = 0";

const REAP: &str = "DELETE FROM urls WHERE is_deleted = 1";

const STATS: &str = "SELECT COUNT(*), COUNT(DISTINCT owner_id) FROM urls WHERE is_deleted = 0";

#[derive(Debug, sqlx::FromRow)]
struct UrlRow {
    id: i64,
    short_code: String,
    original_url: String,
    owner_id: String,
    is_deleted: bool,
}

impl From<UrlRow> for UrlRecord {
    fn from(row: UrlRow) -> Self {
        Self {
            id: row.id as u64,
            short_code: row.short_code,
            original_url: row.original_url,
            owner_id: row.owner_id,
            deleted: row.is_deleted,
        }
    }
}

/// Map an sqlx fault to our taxonomy, keeping the operation as context.
fn db_error(op: &str, err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::Unavailable(format!("{op}: {err}"))
        }
        other => Error::storage(op, other),
    }
}

/// Like [`db_error`], but a unique violation on insert means the short code is taken.
fn insert_error(op: &str, short_code: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return Error::Collision(short_code.to_string());
        }
    }
    db_error(op, err)
}

fn is_in_memory(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Connect, migrate, and only then return the store.
    ///
    /// An in-memory database lives in a single connection, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| Error::Config(format!("invalid database DSN: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_opts = SqlitePoolOptions::new();
        pool_opts = if is_in_memory(dsn) {
            pool_opts
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_opts.max_connections(max_connections.max(1))
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .map_err(|e| db_error("failed to initialize a connection pool", e))?;

        if let Err(e) = Self::migrate(&pool).await {
            pool.close().await;
            return Err(e);
        }

        info!(max_connections, "Relational storage ready");
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| db_error("failed to start a transaction", e))?;

        let current: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("failed to read schema version", e))?;

        let mut applied = 0;
        for (version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            for stmt in statements.iter() {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error(&format!("failed to execute migration {version}"), e))?;
            }
            let bump = format!("PRAGMA user_version = {version}");
            sqlx::query(&bump)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("failed to record schema version", e))?;
            applied += 1;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit the migration", e))?;

        info!(from = current, applied, "Schema migration complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UrlStore for SqlStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to start transaction", e))?;

        let inserted: Option<String> = sqlx::query_scalar(INSERT_URL)
            .bind(short_code)
            .bind(original_url)
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| insert_error("failed to insert data", short_code, e))?;

        let outcome = match inserted {
            Some(_) => PutOutcome::Inserted,
            None => {
                let existing: String = sqlx::query_scalar(LIVE_CODE_FOR_URL)
                    .bind(original_url)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| db_error("failed to scan a response row", e))?;
                PutOutcome::AlreadyExists(existing)
            }
        };

        tx.commit()
            .await
            .map_err(|e| db_error("failed to commit transaction", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self, urls), fields(count = urls.len()))]
    async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to start transaction", e))?;

        let mut outcomes = Vec::with_capacity(urls.len());
        for url in urls {
            let inserted: Option<String> = sqlx::query_scalar(INSERT_URL)
                .bind(&url.short_code)
                .bind(&url.original_url)
                .bind(owner)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| insert_error("unable to insert batch", &url.short_code, e))?;

            let outcome = match inserted {
                Some(_) => PutOutcome::Inserted,
                None => {
                    let existing: String = sqlx::query_scalar(LIVE_CODE_FOR_URL)
                        .bind(&url.original_url)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| db_error("failed to scan a response row", e))?;
                    PutOutcome::AlreadyExists(existing)
                }
            };
            outcomes.push(outcome);
        }

        tx.commit()
            .await
            .map_err(|e| db_error("unable to insert batch", e))?;
        Ok(outcomes)
    }

    async fn get(&self, short_code: &str) -> Result<UrlRecord> {
        sqlx::query_as::<_, UrlRow>(SELECT_BY_CODE)
            .bind(short_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("failed to scan a response row", e))?
            .map(UrlRecord::from)
            .ok_or_else(|| Error::NotFound(short_code.to_string()))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query_as::<_, UrlRow>(SELECT_BY_OWNER)
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("failed to execute query", e))?;
        Ok(rows.into_iter().map(UrlRecord::from).collect())
    }

    #[instrument(skip(self, short_codes), fields(count = short_codes.len()))]
    async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("failed to acquire connection", e))?;

        let mut affected = 0u64;
        for code in short_codes {
            affected += sqlx::query(SOFT_DELETE)
                .bind(code)
                .bind(owner)
                .execute(&mut *conn)
                .await
                .map_err(|e| db_error("unable to update batch", e))?
                .rows_affected();
        }

        debug!(requested = short_codes.len(), affected, "Soft-deleted urls");
        Ok(())
    }

    async fn reap(&self) -> Result<u64> {
        let purged = sqlx::query(REAP)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("failed to drop deleted urls", e))?
            .rows_affected();
        Ok(purged)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let (urls, owners): (i64, i64) = sqlx::query_as(STATS)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("failed to fetch stats", e))?;
        Ok(StoreStats {
            urls: urls as u64,
            owners: owners as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Unavailable(format!("failed to ping the DB: {}", e)))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.pool.close().await;
        info!("Relational storage closed");
        Ok(())
    }

    fn collision_policy(&self) -> CollisionPolicy {
        CollisionPolicy::SingleShot
    }
}
