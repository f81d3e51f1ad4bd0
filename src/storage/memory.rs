//! Volatile in-memory store
//!
//! A `short_code → record` map guarded by a read/write lock: lookups share
//! the lock, mutations take it exclusively. The deletion pipeline reads
//! from many tasks at once while other callers write.
//!
//! The synchronous methods return the records a mutation touched so the
//! file-backed store can mirror exactly those to its log.

use crate::error::{Error, Result};
use crate::model::{NewUrl, PutOutcome, StoreStats, UrlRecord};
use crate::storage::engine::UrlStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

const INIT_SIZE: usize = 100;

struct Inner {
    urls: HashMap<String, UrlRecord>,
    /// original_url → short_code, live records only
    live_by_url: HashMap<String, String>,
    last_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn live_code_for(&self, original_url: &str) -> Option<&String> {
        self.live_by_url.get(original_url)
    }
}

/// In-memory store, cheap to clone (shared state)
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                urls: HashMap::with_capacity(INIT_SIZE),
                live_by_url: HashMap::with_capacity(INIT_SIZE),
                last_id: 0,
            })),
        }
    }

    /// Number of records, soft-deleted ones included
    pub fn len(&self) -> usize {
        self.inner.read().urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().urls.is_empty()
    }

    /// Insert one record, returning the created record if there is one.
    pub(crate) fn insert(
        &self,
        owner: &str,
        short_code: &str,
        original_url: &str,
    ) -> Result<(PutOutcome, Option<UrlRecord>)> {
        let mut inner = self.inner.write();

        if inner.urls.contains_key(short_code) {
            return Err(Error::Collision(short_code.to_string()));
        }
        if let Some(existing) = inner.live_code_for(original_url) {
            return Ok((PutOutcome::AlreadyExists(existing.clone()), None));
        }

        let record = UrlRecord {
            id: inner.next_id(),
            short_code: short_code.to_string(),
            original_url: original_url.to_string(),
            owner_id: owner.to_string(),
            deleted: false,
        };
        inner
            .live_by_url
            .insert(record.original_url.clone(), record.short_code.clone());
        inner.urls.insert(record.short_code.clone(), record.clone());

        Ok((PutOutcome::Inserted, Some(record)))
    }

    /// Insert a batch after checking every code for collision.
    ///
    /// Entries whose URL is already live (in the store or earlier in the
    /// batch) are skipped, like an insert that does nothing on conflict, and
    /// report the live code instead. Returns one outcome per entry plus the
    /// records actually created.
    pub(crate) fn insert_batch(
        &self,
        owner: &str,
        urls: &[NewUrl],
    ) -> Result<(Vec<PutOutcome>, Vec<UrlRecord>)> {
        let mut inner = self.inner.write();

        let mut seen_codes = HashSet::with_capacity(urls.len());
        for url in urls {
            if inner.urls.contains_key(&url.short_code) || !seen_codes.insert(url.short_code.as_str()) {
                return Err(Error::Collision(url.short_code.clone()));
            }
        }

        let mut outcomes = Vec::with_capacity(urls.len());
        let mut inserted = Vec::with_capacity(urls.len());
        for url in urls {
            if let Some(existing) = inner.live_code_for(&url.original_url) {
                debug!(original_url = %url.original_url, "skipping live url in batch");
                outcomes.push(PutOutcome::AlreadyExists(existing.clone()));
                continue;
            }

            let record = UrlRecord {
                id: inner.next_id(),
                short_code: url.short_code.clone(),
                original_url: url.original_url.clone(),
                owner_id: owner.to_string(),
                deleted: false,
            };
            inner
                .live_by_url
                .insert(record.original_url.clone(), record.short_code.clone());
            inner.urls.insert(record.short_code.clone(), record.clone());
            outcomes.push(PutOutcome::Inserted);
            inserted.push(record);
        }

        Ok((outcomes, inserted))
    }

    /// Remove freshly created records again, e.g. when persisting them failed.
    pub(crate) fn forget(&self, records: &[UrlRecord]) {
        let mut inner = self.inner.write();
        for record in records {
            if inner.live_by_url.get(&record.original_url) == Some(&record.short_code) {
                inner.live_by_url.remove(&record.original_url);
            }
            inner.urls.remove(&record.short_code);
        }
    }

    /// Flag `owner`'s records among `short_codes` as deleted.
    ///
    /// Fails without changing anything if any code is absent. Codes owned
    /// by someone else are left alone. Returns the records that flipped.
    pub(crate) fn mark_deleted(&self, owner: &str, short_codes: &[String]) -> Result<Vec<UrlRecord>> {
        let mut inner = self.inner.write();

        if let Some(missing) = short_codes.iter().find(|code| !inner.urls.contains_key(*code)) {
            return Err(Error::NotFound(missing.clone()));
        }

        let mut flipped = Vec::new();
        for code in short_codes {
            let Some(record) = inner.urls.get_mut(code) else {
                continue;
            };
            if record.deleted {
                continue;
            }
            if !record.is_owned_by(owner) {
                debug!(code = %code, "skipping url of another owner");
                continue;
            }
            record.deleted = true;
            flipped.push(record.clone());
        }

        for record in &flipped {
            if inner.live_by_url.get(&record.original_url) == Some(&record.short_code) {
                inner.live_by_url.remove(&record.original_url);
            }
        }

        Ok(flipped)
    }

    /// Drop every soft-deleted record.
    pub(crate) fn purge_deleted(&self) -> u64 {
        let mut inner = self.inner.write();
        let before = inner.urls.len();
        inner.urls.retain(|_, record| !record.deleted);
        (before - inner.urls.len()) as u64
    }

    /// Overwrite the entry for `record.short_code` (log replay, last write wins).
    pub(crate) fn restore(&self, record: UrlRecord) {
        let mut inner = self.inner.write();
        inner.last_id = inner.last_id.max(record.id);

        if record.deleted {
            if inner.live_by_url.get(&record.original_url) == Some(&record.short_code) {
                inner.live_by_url.remove(&record.original_url);
            }
        } else {
            inner
                .live_by_url
                .insert(record.original_url.clone(), record.short_code.clone());
        }
        inner.urls.insert(record.short_code.clone(), record);
    }

    pub(crate) fn lookup(&self, short_code: &str) -> Option<UrlRecord> {
        self.inner.read().urls.get(short_code).cloned()
    }

    pub(crate) fn records_of(&self, owner: &str) -> Vec<UrlRecord> {
        let inner = self.inner.read();
        let mut records: Vec<_> = inner
            .urls
            .values()
            .filter(|record| record.is_owned_by(owner))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub(crate) fn counters(&self) -> StoreStats {
        let inner = self.inner.read();
        let live = inner.urls.values().filter(|record| record.is_live());
        let mut owners = HashSet::new();
        let mut urls = 0u64;
        for record in live {
            urls += 1;
            owners.insert(record.owner_id.as_str());
        }
        StoreStats {
            urls,
            owners: owners.len() as u64,
        }
    }
}

#[async_trait]
impl UrlStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    #[instrument(skip(self))]
    async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome> {
        let (outcome, _) = self.insert(owner, short_code, original_url)?;
        Ok(outcome)
    }

    #[instrument(skip(self, urls), fields(count = urls.len()))]
    async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>> {
        let (outcomes, _) = self.insert_batch(owner, urls)?;
        Ok(outcomes)
    }

    async fn get(&self, short_code: &str) -> Result<UrlRecord> {
        self.lookup(short_code)
            .ok_or_else(|| Error::NotFound(short_code.to_string()))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.records_of(owner))
    }

    #[instrument(skip(self, short_codes), fields(count = short_codes.len()))]
    async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()> {
        let flipped = self.mark_deleted(owner, short_codes)?;
        debug!(deleted = flipped.len(), "Soft-deleted urls");
        Ok(())
    }

    async fn reap(&self) -> Result<u64> {
        Ok(self.purge_deleted())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.counters())
    }
}
