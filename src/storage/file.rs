//! Append-only file-backed store
//!
//! Wraps a [`MemoryStore`] and mirrors every mutation to a log of
//! newline-delimited JSON records, one line per affected record.
//!
//! # Log format
//!
//! ```text
//! {"id":1,"short_code":"c1","original_url":"https://a.example/x","owner_id":"u1","is_deleted":false}
//! {"id":2,"short_code":"c2","original_url":"https://a.example/y","owner_id":"u1","is_deleted":false}
//! {"id":1,"short_code":"c1","original_url":"https://a.example/x","owner_id":"u1","is_deleted":true}
//! ```
//!
//! A mutation is applied to memory first and undone again if its log
//! append fails, so memory never holds state the log does not.
//!
//! Recovery: read lines sequentially, last write wins per short code. A
//! soft delete re-emits the full record with the flag set. The log is never
//! compacted, so it grows with every mutation. Reaping only purges memory;
//! reaped records come back as soft-deleted after a replay and are purged
//! again by the next reap.

use super::memory::MemoryStore;
use crate::error::{Error, Result};
use crate::model::{NewUrl, PutOutcome, StoreStats, UrlRecord};
use crate::storage::engine::UrlStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};

pub struct FileStore {
    memory: MemoryStore,
    log_path: PathBuf,
    /// Held across mutate + append so log order matches memory order
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the log at `path` and replay it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let log_path = path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage("failed to create file storage dir", e))?;
        }

        let store = Self {
            memory: MemoryStore::new(),
            log_path,
            write_lock: Mutex::new(()),
        };
        store.recover()?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn recover(&self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.log_path)
            .map_err(|e| Error::storage("failed to open file storage", e))?;

        info!(path = ?self.log_path, "Replaying url log");

        let mut lines_replayed = 0usize;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::storage("failed to read file storage", e))?;
            if line.trim().is_empty() {
                continue;
            }

            let record: UrlRecord = serde_json::from_str(&line).map_err(|e| {
                Error::Serialization(format!(
                    "failed to parse file storage at line {}: {}",
                    index + 1,
                    e
                ))
            })?;
            self.memory.restore(record);
            lines_replayed += 1;
        }

        info!(
            lines = lines_replayed,
            records = self.memory.len(),
            "Url log replay complete"
        );
        Ok(())
    }

    fn open_log(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Error::storage("failed to open file storage", e))
    }

    /// Append one line per record, then sync and close.
    fn append(&self, mut file: File, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(records.len() * 128);
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| Error::Serialization(format!("failed to dump URL: {}", e)))?;
            buf.push(b'\n');
        }

        file.write_all(&buf)
            .map_err(|e| Error::storage("failed to dump URL", e))?;
        if let Err(e) = file.sync_data() {
            error!(error = %e, "failed to sync file storage");
        }

        debug!(lines = records.len(), "Appended to url log");
        Ok(())
    }
}

#[async_trait]
impl UrlStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self))]
    async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome> {
        let _guard = self.write_lock.lock();
        let file = self.open_log()?;

        let (outcome, created) = self.memory.insert(owner, short_code, original_url)?;
        if let Some(record) = created {
            let created = [record];
            if let Err(e) = self.append(file, &created) {
                self.memory.forget(&created);
                return Err(e);
            }
        }
        Ok(outcome)
    }

    #[instrument(skip(self, urls), fields(count = urls.len()))]
    async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>> {
        let _guard = self.write_lock.lock();
        let file = self.open_log()?;

        let (outcomes, inserted) = self.memory.insert_batch(owner, urls)?;
        if let Err(e) = self.append(file, &inserted) {
            self.memory.forget(&inserted);
            return Err(e);
        }
        Ok(outcomes)
    }

    async fn get(&self, short_code: &str) -> Result<UrlRecord> {
        self.memory.get(short_code).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>> {
        self.memory.list_by_owner(owner).await
    }

    #[instrument(skip(self, short_codes), fields(count = short_codes.len()))]
    async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let file = self.open_log()?;

        let flipped = self.memory.mark_deleted(owner, short_codes)?;
        if let Err(e) = self.append(file, &flipped) {
            for record in flipped {
                self.memory.restore(UrlRecord {
                    deleted: false,
                    ..record
                });
            }
            return Err(e);
        }
        Ok(())
    }

    async fn reap(&self) -> Result<u64> {
        let _guard = self.write_lock.lock();
        Ok(self.memory.purge_deleted())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.memory.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("urls.json")
    }

    fn temp_dir() -> Result<tempfile::TempDir> {
        tempfile::tempdir().map_err(|e| Error::storage("failed to create temp dir", e))
    }

    #[tokio::test]
    async fn test_file_store_recovery() -> Result<()> {
        let dir = temp_dir()?;
        let path = log_path(&dir);

        {
            let store = FileStore::open(&path)?;
            store.put("u1", "c1", "https://a.example/1").await?;
            store
                .put_batch(
                    "u2",
                    &[
                        NewUrl::new("c2", "https://a.example/2"),
                        NewUrl::new("c3", "https://a.example/3"),
                    ],
                )
                .await?;
            store.soft_delete("u1", &["c1".to_string()]).await?;
        }

        let store = FileStore::open(&path)?;
        let c1 = store.get("c1").await?;
        assert!(c1.deleted);
        assert_eq!(c1.id, 1);
        assert_eq!(store.get("c3").await?.owner_id, "u2");
        assert_eq!(store.stats().await?, StoreStats { urls: 2, owners: 1 });

        // the id counter resumes after the replayed maximum
        store.put("u1", "c4", "https://a.example/4").await?;
        assert_eq!(store.get("c4").await?.id, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_log_only_grows() -> Result<()> {
        let dir = temp_dir()?;
        let path = log_path(&dir);
        let store = FileStore::open(&path)?;

        store.put("u1", "c1", "https://a.example/1").await?;
        let size_after_put = std::fs::metadata(&path)
            .map_err(|e| Error::storage("stat", e))?
            .len();

        store.soft_delete("u1", &["c1".to_string()]).await?;
        let size_after_delete = std::fs::metadata(&path)
            .map_err(|e| Error::storage("stat", e))?
            .len();
        assert!(size_after_delete > size_after_put);

        store.reap().await?;
        let size_after_reap = std::fs::metadata(&path)
            .map_err(|e| Error::storage("stat", e))?
            .len();
        assert_eq!(size_after_reap, size_after_delete);

        let contents = std::fs::read_to_string(&path).map_err(|e| Error::storage("read", e))?;
        assert_eq!(contents.lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_dedup_writes_nothing() -> Result<()> {
        let dir = temp_dir()?;
        let path = log_path(&dir);
        let store = FileStore::open(&path)?;

        store.put("u1", "c1", "https://a.example/1").await?;
        assert_eq!(
            store.put("u1", "c2", "https://a.example/1").await?,
            PutOutcome::AlreadyExists("c1".to_string())
        );
        assert!(matches!(
            store.put("u1", "c1", "https://a.example/other").await,
            Err(Error::Collision(_))
        ));

        let contents = std::fs::read_to_string(&path).map_err(|e| Error::storage("read", e))?;
        assert_eq!(contents.lines().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_rolls_back_on_failed_append() -> Result<()> {
        // writes to /dev/full always fail with ENOSPC
        let full = Path::new("/dev/full");
        if !full.exists() {
            return Ok(());
        }

        let dir = temp_dir()?;
        let mut store = FileStore::open(log_path(&dir))?;
        store.put("u1", "c1", "https://a.example/1").await?;
        let healthy_log = std::mem::replace(&mut store.log_path, full.to_path_buf());

        assert!(matches!(
            store.put("u1", "c2", "https://a.example/2").await,
            Err(Error::Storage(_))
        ));
        assert!(matches!(store.get("c2").await, Err(Error::NotFound(_))));

        assert!(store
            .put_batch("u1", &[NewUrl::new("c3", "https://a.example/3")])
            .await
            .is_err());
        assert!(matches!(store.get("c3").await, Err(Error::NotFound(_))));

        assert!(store.soft_delete("u1", &["c1".to_string()]).await.is_err());
        assert!(!store.get("c1").await?.deleted);

        // nothing of the failed writes lingers once the log is writable again
        store.log_path = healthy_log;
        assert_eq!(
            store.put("u1", "c4", "https://a.example/2").await?,
            PutOutcome::Inserted
        );
        assert_eq!(
            store.put("u1", "c5", "https://a.example/1").await?,
            PutOutcome::AlreadyExists("c1".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_file_store_rejects_corrupt_log() -> Result<()> {
        let dir = temp_dir()?;
        let path = log_path(&dir);
        std::fs::write(&path, "{\"id\":1,\"short_code\":\"c1\"\nnot json\n")
            .map_err(|e| Error::storage("write", e))?;

        assert!(matches!(FileStore::open(&path), Err(Error::Serialization(_))));
        Ok(())
    }
}
