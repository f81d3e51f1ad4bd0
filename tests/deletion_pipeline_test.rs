//! Deletion pipeline over real backends and faulty test doubles

use async_trait::async_trait;
use shortener::deletion::DEFAULT_WORKERS;
use shortener::error::{Error, Result};
use shortener::storage::{FileStore, MemoryStore, SqlStore};
use shortener::{DeletionPipeline, NewUrl, PutOutcome, Settings, Storage, StoreStats, UrlRecord, UrlStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

/// Delegates to a memory store, with switchable faults
#[derive(Default)]
struct Faulty {
    inner: MemoryStore,
    failing_get: Option<&'static str>,
    fail_commit: bool,
    commits: AtomicUsize,
}

#[async_trait]
impl UrlStore for Faulty {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn put(&self, owner: &str, short_code: &str, original_url: &str) -> Result<PutOutcome> {
        self.inner.put(owner, short_code, original_url).await
    }

    async fn put_batch(&self, owner: &str, urls: &[NewUrl]) -> Result<Vec<PutOutcome>> {
        self.inner.put_batch(owner, urls).await
    }

    async fn get(&self, short_code: &str) -> Result<UrlRecord> {
        if self.failing_get == Some(short_code) {
            return Err(Error::Unavailable("connection reset".into()));
        }
        self.inner.get(short_code).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<UrlRecord>> {
        self.inner.list_by_owner(owner).await
    }

    async fn soft_delete(&self, owner: &str, short_codes: &[String]) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit {
            return Err(Error::Unavailable("connection reset".into()));
        }
        self.inner.soft_delete(owner, short_codes).await
    }

    async fn reap(&self) -> Result<u64> {
        self.inner.reap().await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

async fn seed(store: &dyn UrlStore) -> Result<()> {
    store.put("alice", "a1", "https://a.example/1").await?;
    store.put("alice", "a2", "https://a.example/2").await?;
    store.put("alice", "a3", "https://a.example/3").await?;
    store.put("bob", "b1", "https://b.example/1").await?;
    store.put("bob", "b2", "https://b.example/2").await?;
    Ok(())
}

#[tokio::test]
async fn test_mixed_owners_on_every_backend() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stores: Vec<Arc<dyn UrlStore>> = vec![
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::open(dir.path().join("urls.json"))?),
        Arc::new(SqlStore::connect("sqlite::memory:", 1).await?),
    ];

    for store in stores {
        let name = store.name();
        seed(store.as_ref()).await?;

        let report = DeletionPipeline::new(Arc::clone(&store), DEFAULT_WORKERS)
            .run(
                "alice",
                codes(&["a1", "b1", "a3", "b2", "nope"]),
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(report.committed, 2, "{name}");
        assert!(!report.cancelled, "{name}");

        assert!(store.get("a1").await?.deleted, "{name}");
        assert!(!store.get("a2").await?.deleted, "{name}");
        assert!(store.get("a3").await?.deleted, "{name}");
        assert!(!store.get("b1").await?.deleted, "{name}");
        assert!(!store.get("b2").await?.deleted, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn test_storage_delete_urls_uses_configured_workers() -> anyhow::Result<()> {
    let settings = Settings {
        delete_workers: 2,
        ..Settings::default()
    };
    let storage = Storage::open(&settings).await?;
    seed(storage.engine().as_ref()).await?;

    let report = storage
        .delete_urls("bob", codes(&["a1", "b1", "b2"]), &CancellationToken::new())
        .await?;
    assert_eq!(report.requested, 3);
    assert_eq!(report.committed, 2);
    assert_eq!(storage.stats().await?.owners, 1);
    Ok(())
}

#[tokio::test]
async fn test_pre_cancelled_run_never_commits() -> anyhow::Result<()> {
    let store = Arc::new(Faulty::default());
    seed(store.as_ref()).await?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = DeletionPipeline::new(store.clone(), 4)
        .run("alice", codes(&["a1", "a2", "a3"]), &cancel)
        .await?;

    assert!(report.cancelled);
    assert_eq!(report.committed, 0);
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    assert_eq!(store.stats().await?.urls, 5);
    Ok(())
}

#[tokio::test]
async fn test_lookup_failure_drops_only_that_code() -> anyhow::Result<()> {
    let store = Arc::new(Faulty {
        failing_get: Some("a2"),
        ..Faulty::default()
    });
    seed(store.as_ref()).await?;

    let report = DeletionPipeline::new(store.clone(), 3)
        .run("alice", codes(&["a1", "a2", "a3"]), &CancellationToken::new())
        .await?;

    assert_eq!(report.committed, 2);
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
    assert!(!store.inner.get("a2").await?.deleted);
    Ok(())
}

#[tokio::test]
async fn test_commit_failure_is_returned_unchanged() -> anyhow::Result<()> {
    let store = Arc::new(Faulty {
        fail_commit: true,
        ..Faulty::default()
    });
    seed(store.as_ref()).await?;

    let result = DeletionPipeline::new(store.clone(), 3)
        .run("alice", codes(&["a1", "b1"]), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Unavailable(_))));
    assert_eq!(store.commits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_empty_request_skips_commit() -> anyhow::Result<()> {
    let store = Arc::new(Faulty::default());

    let report = DeletionPipeline::new(store.clone(), DEFAULT_WORKERS)
        .run("alice", Vec::new(), &CancellationToken::new())
        .await?;

    assert_eq!(report.requested, 0);
    assert_eq!(report.committed, 0);
    assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    Ok(())
}
