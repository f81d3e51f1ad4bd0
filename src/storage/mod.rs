//! Storage layer
//!
//! # Architecture
//!
//! Every backend implements the [`UrlStore`] contract; [`Storage`] picks one
//! from [`Settings`](crate::Settings) at construction time:
//!
//! ```text
//! database_dsn set?       ─yes─→ SqlStore   (sqlx/SQLite, migrates on connect)
//!   └─no→ file path set?  ─yes─→ FileStore  (append-only JSON lines, replays on open)
//!          └─no─────────────────→ MemoryStore (RwLock-guarded map)
//! ```
//!
//! ## Shared semantics
//!
//! - Short codes are unique per backend; a taken code is `Error::Collision`
//! - A live record per original URL; resubmitting returns `AlreadyExists`
//! - `deleted` only ever flips false → true; `reap` is the only removal
//!
//! ## Collision handling
//!
//! Memory and file stores are retried locally by the caller; the
//! relational store is single-shot (see [`crate::shortcode`]).

pub mod engine;
pub mod file;
pub mod memory;
pub mod sql;

pub use engine::{Storage, UrlStore};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sql::SqlStore;
