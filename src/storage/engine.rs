//! Storage contract and the facade that selects a backend

use super::file::FileStore;
use super::memory::MemoryStore;
use super::sql::SqlStore;
use crate::config::{Backend, Settings};
use crate::deletion::{DeletionPipeline, DeletionReport};
use crate::error::{Error, Result};
use crate::model::{NewUrl, PutOutcome, StoreStats, UrlRecord};
use crate::shortcode::{CodeAllocator, CollisionPolicy, Shortened};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Operations every backend provides with identical semantics.
///
/// Owner identity is always an explicit argument. A live record with the
/// same original URL makes `put` return [`PutOutcome::AlreadyExists`]; a
/// taken short code is [`Error::Collision`]. `get` still returns
/// soft-deleted records (with `deleted: true`) so callers can tell absent
/// from gone.
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome>;

    /// Insert many entries; one failure fails the whole batch.
    ///
    /// Returns one outcome per entry, in input order. An entry whose URL is
    /// already live, in the store or earlier in the same batch, is not
    /// inserted and reports the live code as [`PutOutcome::AlreadyExists`].
    async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>>;

    async fn get(&self, short_code: &str) -> Result<UrlRecord>;

    /// All records of `owner`, soft-deleted ones included, in id order
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>>;

    /// Flag the given codes as deleted. Authorization is the caller's job.
    async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()>;

    /// Physically remove soft-deleted records, returning how many went.
    async fn reap(&self) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// How callers should react to a short code collision on this backend
    fn collision_policy(&self) -> CollisionPolicy {
        CollisionPolicy::LocalRetry
    }
}

/// Main storage interface
#[derive(Clone)]
pub struct Storage {
    engine: Arc<dyn UrlStore>,
    settings: Settings,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.engine.name())
            .finish()
    }
}

impl Storage {
    pub fn new(engine: Arc<dyn UrlStore>, settings: Settings) -> Self {
        Self { engine, settings }
    }

    /// Build the backend the settings select.
    ///
    /// Schema migration and log replay happen here; if either fails no
    /// store is returned.
    pub async fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let engine: Arc<dyn UrlStore> = match settings.backend() {
            Backend::Relational(dsn) => {
                Arc::new(SqlStore::connect(&dsn, settings.max_connections).await?)
            }
            Backend::File(path) => Arc::new(FileStore::open(&path)?),
            Backend::Memory => Arc::new(MemoryStore::new()),
        };

        info!(backend = engine.name(), "Storage initialized");
        Ok(Self::new(engine, settings.clone()))
    }

    /// Shared handle to the selected backend
    pub fn engine(&self) -> Arc<dyn UrlStore> {
        Arc::clone(&self.engine)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn allocator(&self) -> CodeAllocator {
        CodeAllocator::new(
            self.engine.collision_policy(),
            self.settings.max_code_attempts,
            self.settings.code_bytes,
        )
    }

    /// Allocate a short code for `original_url`, or return the live one.
    #[instrument(skip(self))]
    pub async fn shorten(&self, owner: &str, original_url: &str) -> Result<Shortened> {
        let engine = &self.engine;
        self.allocator()
            .allocate(move |code| async move { engine.put(owner, &code, original_url).await })
            .await
    }

    /// Allocate codes for several URLs in one batch, in input order.
    ///
    /// URLs that are already live come back with their existing code.
    #[instrument(skip(self, original_urls), fields(count = original_urls.len()))]
    pub async fn shorten_batch(&self, owner: &str, original_urls: &[String]) -> Result<Vec<NewUrl>> {
        let engine = &self.engine;
        self.allocator()
            .allocate_batch(original_urls, move |batch| async move {
                engine.put_batch(owner, &batch).await
            })
            .await
    }

    /// Resolve a code for redirection; soft-deleted records are `Gone`.
    pub async fn resolve(&self, short_code: &str) -> Result<String> {
        let record = self.engine.get(short_code).await?;
        if record.deleted {
            return Err(Error::Gone(short_code.to_string()));
        }
        Ok(record.original_url)
    }

    /// Run the deletion pipeline for `owner` over `short_codes`.
    pub async fn delete_urls(
        &self,
        owner: &str,
        short_codes: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<DeletionReport> {
        DeletionPipeline::new(self.engine(), self.settings.delete_workers)
            .run(owner, short_codes, cancel)
            .await
    }

    pub async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome> {
        self.engine.put(owner, short_code, original_url).await
    }

    pub async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>> {
        self.engine.put_batch(owner, urls).await
    }

    pub async fn get(&self, short_code: &str) -> Result<UrlRecord> {
        self.engine.get(short_code).await
    }

    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>> {
        self.engine.list_by_owner(owner).await
    }

    pub async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()> {
        self.engine.soft_delete(owner, short_codes).await
    }

    pub async fn reap(&self) -> Result<u64> {
        self.engine.reap().await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.engine.stats().await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.engine.health_check().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.engine.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_storage() -> Result<Storage> {
        Storage::open(&Settings::default()).await
    }

    #[tokio::test]
    async fn test_shorten_then_resolve() -> Result<()> {
        let storage = memory_storage().await?;

        let shortened = storage.shorten("u1", "https://a.example/x").await?;
        assert!(shortened.is_new());
        assert_eq!(shortened.code().len(), 16);
        assert_eq!(storage.resolve(shortened.code()).await?, "https://a.example/x");

        let again = storage.shorten("u1", "https://a.example/x").await?;
        assert_eq!(again, Shortened::Existing(shortened.code().to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_distinguishes_gone_from_missing() -> Result<()> {
        let storage = memory_storage().await?;
        storage.put("u1", "c1", "https://a.example/x").await?;
        storage.soft_delete("u1", &["c1".to_string()]).await?;

        assert!(matches!(storage.resolve("c1").await, Err(Error::Gone(_))));
        assert!(matches!(storage.resolve("nope").await, Err(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_shorten_batch_keeps_input_order() -> Result<()> {
        let storage = memory_storage().await?;
        let urls = vec![
            "https://a.example/1".to_string(),
            "https://a.example/2".to_string(),
        ];

        let batch = storage.shorten_batch("u1", &urls).await?;
        assert_eq!(batch.len(), 2);
        for (entry, url) in batch.iter().zip(&urls) {
            assert_eq!(&entry.original_url, url);
            assert_eq!(storage.resolve(&entry.short_code).await?, *url);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_health_check_is_noop_for_memory() -> Result<()> {
        let storage = memory_storage().await?;
        storage.health_check().await?;
        storage.shutdown().await
    }
}
