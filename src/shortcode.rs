//! Short code generation and collision handling
//!
//! Codes are random bytes from the OS CSPRNG, hex-encoded. Generation does
//! not coordinate with storage, so collisions only show up at insert time
//! as [`Error::Collision`]. What happens next depends on the backend's
//! [`CollisionPolicy`]:
//!
//! - `LocalRetry`: regenerate and insert again, up to a fixed number of
//!   attempts, then fail with [`Error::RetryExhausted`]. Used by the memory
//!   and file backends where the collision check is a local map lookup.
//! - `SingleShot`: one attempt; the backend's unique index rejects a
//!   collision and the error is returned as is. Used by the relational
//!   backend.

use crate::error::{Error, Result};
use crate::model::{NewUrl, PutOutcome};
use rand::rngs::OsRng;
use rand::RngCore;
use std::future::Future;
use tracing::{debug, warn};

/// Random bytes per code by default (16 hex characters)
pub const DEFAULT_CODE_BYTES: usize = 8;

/// Attempts before a local retry loop gives up by default
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    LocalRetry,
    SingleShot,
}

/// Generate one hex-encoded short code from `width` random bytes.
pub fn generate(width: usize) -> Result<String> {
    let mut bytes = vec![0u8; width];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Storage(format!("generate short code error: {}", e)))?;
    Ok(hex::encode(bytes))
}

/// Outcome of one insert attempt, as seen by the allocation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Inserted(String),
    Deduplicated(String),
    Retry,
    Exhausted,
}

/// Result of allocating a code for one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new mapping was stored under this code
    Created(String),
    /// The URL was already live under this code
    Existing(String),
}

impl Shortened {
    pub fn code(&self) -> &str {
        match self {
            Shortened::Created(code) | Shortened::Existing(code) => code,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Shortened::Created(_))
    }
}

/// Drives the generate/insert loop for one collision policy.
#[derive(Debug, Clone, Copy)]
pub struct CodeAllocator {
    policy: CollisionPolicy,
    max_attempts: usize,
    code_bytes: usize,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self::new(CollisionPolicy::LocalRetry, DEFAULT_MAX_ATTEMPTS, DEFAULT_CODE_BYTES)
    }
}

impl CodeAllocator {
    pub fn new(policy: CollisionPolicy, max_attempts: usize, code_bytes: usize) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
            code_bytes,
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Classify the result of attempt number `attempt` (1-based).
    pub fn step(&self, attempt: usize, code: &str, result: Result<PutOutcome>) -> Result<Attempt> {
        match result {
            Ok(PutOutcome::Inserted) => Ok(Attempt::Inserted(code.to_string())),
            Ok(PutOutcome::AlreadyExists(existing)) => Ok(Attempt::Deduplicated(existing)),
            Err(Error::Collision(taken)) => match self.policy {
                CollisionPolicy::SingleShot => Err(Error::Collision(taken)),
                CollisionPolicy::LocalRetry if attempt < self.max_attempts => Ok(Attempt::Retry),
                CollisionPolicy::LocalRetry => Ok(Attempt::Exhausted),
            },
            Err(e) => Err(e),
        }
    }

    /// Generate codes and hand them to `insert` until one sticks.
    pub async fn allocate<F, Fut>(&self, mut insert: F) -> Result<Shortened>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<PutOutcome>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let code = generate(self.code_bytes)?;
            let result = insert(code.clone()).await;

            match self.step(attempt, &code, result)? {
                Attempt::Inserted(code) => return Ok(Shortened::Created(code)),
                Attempt::Deduplicated(code) => return Ok(Shortened::Existing(code)),
                Attempt::Retry => {
                    debug!(attempt, code = %code, "short code collision, regenerating");
                }
                Attempt::Exhausted => {
                    warn!(attempts = attempt, "short code space contention");
                    return Err(Error::RetryExhausted { attempts: attempt });
                }
            }
        }
    }

    /// Batch variant: a collision anywhere regenerates every code.
    ///
    /// `insert` reports one outcome per entry; entries that were already
    /// live come back carrying the existing code instead of the generated one.
    pub async fn allocate_batch<F, Fut>(&self, original_urls: &[String], mut insert: F) -> Result<Vec<NewUrl>>
    where
        F: FnMut(Vec<NewUrl>) -> Fut,
        Fut: Future<Output = Result<Vec<PutOutcome>>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let batch = original_urls
                .iter()
                .map(|url| Ok(NewUrl::new(generate(self.code_bytes)?, url.as_str())))
                .collect::<Result<Vec<_>>>()?;

            let (outcomes, result) = match insert(batch.clone()).await {
                Ok(outcomes) => (outcomes, Ok(PutOutcome::Inserted)),
                Err(e) => (Vec::new(), Err(e)),
            };

            match self.step(attempt, "", result)? {
                Attempt::Inserted(_) | Attempt::Deduplicated(_) => {
                    return Ok(resolve_batch(batch, outcomes));
                }
                Attempt::Retry => {
                    debug!(attempt, size = batch.len(), "short code collision in batch, regenerating");
                }
                Attempt::Exhausted => {
                    warn!(attempts = attempt, "short code space contention");
                    return Err(Error::RetryExhausted { attempts: attempt });
                }
            }
        }
    }
}

/// Replace generated codes with the live ones the store reported.
fn resolve_batch(batch: Vec<NewUrl>, outcomes: Vec<PutOutcome>) -> Vec<NewUrl> {
    batch
        .into_iter()
        .zip(outcomes.into_iter().map(Some).chain(std::iter::repeat(None)))
        .map(|(entry, outcome)| match outcome {
            Some(PutOutcome::AlreadyExists(existing)) => NewUrl {
                short_code: existing,
                ..entry
            },
            _ => entry,
        })
        .collect()
}
