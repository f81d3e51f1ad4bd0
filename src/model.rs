//! URL record and the value types exchanged over the storage contract

use serde::{Deserialize, Serialize};

/// A stored short-code mapping.
///
/// `deleted` is the only field that changes after creation, and only
/// from `false` to `true`. The serialized form is also the line format of
/// the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: u64,
    pub short_code: String,
    pub original_url: String,
    pub owner_id: String,
    #[serde(rename = "is_deleted")]
    pub deleted: bool,
}

impl UrlRecord {
    /// Whether this record can still be resolved and deduplicated against.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner_id == owner
    }
}

/// One entry of a batch insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUrl {
    pub short_code: String,
    pub original_url: String,
}

impl NewUrl {
    pub fn new(short_code: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            short_code: short_code.into(),
            original_url: original_url.into(),
        }
    }
}

/// Successful result of a single insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new record was created under the submitted code
    Inserted,
    /// A live record for the same original URL already exists; carries its code
    AlreadyExists(String),
}

/// Aggregate counters over live records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub urls: u64,
    pub owners: u64,
}
