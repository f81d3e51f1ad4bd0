//! Owner-scoped deletion pipeline
//!
//! Authorizes every requested code concurrently, then commits the
//! authorized subset with a single `soft_delete` call.
//!
//! ```text
//!                      ┌─ worker 0 ─→ out 0 ─ forwarder ─┐
//! codes ─ generator ─→ queue ─ ...                      ├─→ merged ─→ collect ─→ soft_delete
//!                      └─ worker N ─→ out N ─ forwarder ─┘
//! ```
//!
//! Workers drop codes that are missing or owned by someone else without
//! reporting them; that is a permission outcome, not a fault. The merged
//! queue closes once the last forwarder has finished and dropped its
//! sender. Cancellation is cooperative: the generator and the queue loops
//! stop, but a worker blocked in a backend call finishes that call first.
//! Codes reach the collector in no particular order.

use crate::error::{Error, Result};
use crate::storage::UrlStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Worker pool width used when none is configured
pub const DEFAULT_WORKERS: usize = 10;

const QUEUE_CAPACITY: usize = 16;

/// What a pipeline run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Codes submitted by the caller
    pub requested: usize,
    /// Codes handed to the final `soft_delete`
    pub committed: usize,
    /// Cancellation fired before the commit; nothing was deleted
    pub cancelled: bool,
}

pub struct DeletionPipeline {
    store: Arc<dyn UrlStore>,
    workers: usize,
}

impl DeletionPipeline {
    pub fn new(store: Arc<dyn UrlStore>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    /// Soft-delete those of `short_codes` that belong to `owner`.
    ///
    /// Only the final commit can fail the run.
    #[instrument(skip(self, short_codes, cancel), fields(requested = short_codes.len()))]
    pub async fn run(
        &self,
        owner: &str,
        short_codes: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<DeletionReport> {
        let requested = short_codes.len();
        let owner: Arc<str> = Arc::from(owner);

        let queue = spawn_generator(short_codes, cancel.clone());
        let outputs = self.fan_out(&owner, queue, cancel);
        let mut merged = fan_in(outputs, cancel.clone());

        let mut authorized = Vec::with_capacity(requested);
        while let Some(code) = merged.recv().await {
            authorized.push(code);
        }

        if cancel.is_cancelled() {
            info!(authorized = authorized.len(), "Deletion cancelled before commit");
            return Ok(DeletionReport {
                requested,
                committed: 0,
                cancelled: true,
            });
        }

        if authorized.is_empty() {
            debug!("No authorized urls to delete");
            return Ok(DeletionReport {
                requested,
                ..DeletionReport::default()
            });
        }

        self.store.soft_delete(&owner, &authorized).await?;

        info!(committed = authorized.len(), "Deleted user urls");
        Ok(DeletionReport {
            requested,
            committed: authorized.len(),
            cancelled: false,
        })
    }

    fn fan_out(
        &self,
        owner: &Arc<str>,
        queue: mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Vec<mpsc::Receiver<String>> {
        let queue = Arc::new(Mutex::new(queue));
        (0..self.workers)
            .map(|worker| {
                spawn_worker(
                    worker,
                    Arc::clone(&self.store),
                    Arc::clone(owner),
                    Arc::clone(&queue),
                    cancel.clone(),
                )
            })
            .collect()
    }
}

fn spawn_generator(short_codes: Vec<String>, cancel: CancellationToken) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    tokio::spawn(async move {
        for code in short_codes {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(code) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    });

    rx
}

fn spawn_worker(
    worker: usize,
    store: Arc<dyn UrlStore>,
    owner: Arc<str>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    tokio::spawn(async move {
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    code = queue.recv() => code,
                }
            };
            let Some(code) = next else {
                break;
            };

            match authorize(store.as_ref(), &owner, &code).await {
                Ok(code) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = tx.send(code) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(Error::NotFound(_)) | Err(Error::PermissionDenied(_)) => {
                    debug!(worker, code = %code, "Dropping unauthorized url");
                }
                Err(e) => {
                    error!(worker, code = %code, error = %e, "failed to check URL");
                }
            }
        }
    });

    rx
}

fn fan_in(outputs: Vec<mpsc::Receiver<String>>, cancel: CancellationToken) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    for mut output in outputs {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let code = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    code = output.recv() => code,
                };
                let Some(code) = code else {
                    return;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(code) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    rx
}

/// Check that `owner` may delete `short_code`.
async fn authorize(store: &dyn UrlStore, owner: &str, short_code: &str) -> Result<String> {
    let record = store.get(short_code).await?;
    if !record.is_owned_by(owner) {
        return Err(Error::PermissionDenied(short_code.to_string()));
    }
    Ok(record.short_code)
}
