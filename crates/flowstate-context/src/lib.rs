//! File-backed context storage for flowstate.
//!
//! Values live in named scopes and are addressed by property paths such as
//! `foo.bar[1]`. Scopes are `global`, a flow id, or `<nodeId>:<flowId>`,
//! each persisted as one JSON file. Two backends:
//! - Disk-direct: every operation goes to the scope's file
//! - Cached: every scope is held in memory and persisted in the background

pub mod cache;
pub mod config;
pub mod disk;
pub mod error;
pub mod file;
pub mod pending;
pub mod property;
pub mod scope;
pub mod store;

pub use cache::MemoryCache;
pub use config::{ContextConfig, RuntimeSettings};
pub use disk::DiskStore;
pub use error::{ContextError, ContextResult};
pub use file::FileStore;
pub use pending::PendingWrite;
pub use property::PropertyPath;
pub use scope::{ScopeLocation, GLOBAL_SCOPE};
pub use store::ContextStore;

use async_trait::async_trait;
use serde_json::Value;

/// A trait for context storage backends.
///
/// Scopes are identified by strings (`global`, `<flowId>`,
/// `<nodeId>:<flowId>`); properties within a scope by a [`PropertyPath`]
/// string. Values are JSON, and `None` stands for "no value".
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Prepare the backend for use.
    async fn open(&self) -> ContextResult<()>;

    /// Persist everything still pending and release resources.
    async fn close(&self) -> ContextResult<()>;

    /// Read the value at `path` in `scope`.
    ///
    /// Returns `None` if nothing is stored there.
    async fn get(&self, scope: &str, path: &str) -> ContextResult<Option<Value>>;

    /// Store a value at `path` in `scope`; `None` deletes it.
    ///
    /// Deleting prunes any parent left empty.
    fn set(&self, scope: &str, path: &str, value: Option<Value>) -> PendingWrite;

    /// Top-level property names of `scope`, in insertion order.
    async fn keys(&self, scope: &str) -> ContextResult<Vec<String>>;

    /// Remove a scope and its backing file.
    async fn delete(&self, scope: &str) -> ContextResult<()>;

    /// Remove every container whose id is not in `active`.
    ///
    /// The global container is always kept.
    async fn clean(&self, active: &[String]) -> ContextResult<()>;

    /// Read without suspending. Only cached backends support this.
    fn get_now(&self, _scope: &str, _path: &str) -> ContextResult<Option<Value>> {
        Err(ContextError::CacheRequired("get_now"))
    }

    /// List keys without suspending. Only cached backends support this.
    fn keys_now(&self, _scope: &str) -> ContextResult<Vec<String>> {
        Err(ContextError::CacheRequired("keys_now"))
    }
}
