//! Shortener configuration
//!
//! Settings are an explicit value built once at startup and handed to every
//! constructor. Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `SHORTENER_*` environment variables (e.g. `SHORTENER_DATABASE_DSN`)
//!
//! The binary applies its command-line flags on top of the loaded value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which backend a [`Settings`] value selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Relational(String),
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Relational connection string (e.g. `sqlite://data/urls.db`)
    pub database_dsn: Option<String>,
    /// Append-only log for the file-backed store
    pub file_storage_path: Option<PathBuf>,
    /// Period between reaper runs (seconds)
    pub reap_interval_secs: u64,
    /// Width of the deletion pipeline worker pool
    pub delete_workers: usize,
    /// Random bytes per short code (hex-encoded to twice as many chars)
    pub code_bytes: usize,
    /// Attempts before giving up on a colliding short code
    pub max_code_attempts: usize,
    /// Relational connection pool size
    pub max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_dsn: None,
            file_storage_path: None,
            reap_interval_secs: 600,
            delete_workers: 10,
            code_bytes: 8,
            max_code_attempts: 5,
            max_connections: 5,
        }
    }
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "SHORTENER";

    /// Load settings from defaults, an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(Self::ENV_PREFIX).try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.reap_interval_secs == 0 {
            return Err(Error::Config("reap_interval_secs must be at least 1".to_string()));
        }
        if self.delete_workers == 0 {
            return Err(Error::Config("delete_workers must be at least 1".to_string()));
        }
        if self.code_bytes == 0 {
            return Err(Error::Config("code_bytes must be at least 1".to_string()));
        }
        if self.max_code_attempts == 0 {
            return Err(Error::Config("max_code_attempts must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Backend selection: a connection string wins over a file path, and
    /// with neither the store stays in memory. Empty strings count as unset.
    pub fn backend(&self) -> Backend {
        if let Some(dsn) = self.database_dsn.as_deref().filter(|d| !d.trim().is_empty()) {
            return Backend::Relational(dsn.to_string());
        }
        match &self.file_storage_path {
            Some(path) if !path.as_os_str().is_empty() => Backend::File(path.clone()),
            _ => Backend::Memory,
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
