// Shortener - storage core
// Maps long URLs to short codes for many owners over swappable backends

#![warn(rust_2018_idioms)]

pub mod config;
pub mod deletion;
pub mod model;
pub mod reaper;
pub mod shortcode;
pub mod storage;

// Re-exports for convenience
pub use config::Settings;
pub use deletion::{DeletionPipeline, DeletionReport};
pub use model::{NewUrl, PutOutcome, StoreStats, UrlRecord};
pub use storage::{Storage, UrlStore};

/// Shortener error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// Code absent, or not visible to the requester
        #[error("url not found: {0}")]
        NotFound(String),

        /// Code present but soft-deleted
        #[error("url gone: {0}")]
        Gone(String),

        /// Short code is already taken; the caller should pick another one
        #[error("short code already exists: {0}")]
        Collision(String),

        #[error("generation attempts exceeded after {attempts} tries")]
        RetryExhausted { attempts: usize },

        /// Backend unreachable, as opposed to a data error
        #[error("storage unavailable: {0}")]
        Unavailable(String),

        /// Pipeline-internal; never surfaced past the deletion pipeline
        #[error("permission denied for url: {0}")]
        PermissionDenied(String),

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Serialization error: {0}")]
        Serialization(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// Wrap a storage fault with the operation that produced it.
        pub fn storage(op: &str, err: impl std::fmt::Display) -> Self {
            Error::Storage(format!("{op}: {err}"))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_storage_error_carries_operation() {
        let err = Error::storage("failed to open log", "permission denied");
        assert_eq!(
            err.to_string(),
            "Storage error: failed to open log: permission denied"
        );
    }
}
