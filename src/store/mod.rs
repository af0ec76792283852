//! Persistence layer — libSQL-backed session records and the local session
//! cache.

pub mod libsql_backend;
pub mod local_cache;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use local_cache::{CachedSession, FileCache, LocalCache, MemoryCache, SessionStore};
pub use traits::RecordStore;
