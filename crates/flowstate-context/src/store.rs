//! The context store façade.

use crate::cache::MemoryCache;
use crate::config::ContextConfig;
use crate::disk::DiskStore;
use crate::file::FileStore;
use crate::pending::PendingWrite;
use crate::{ContextBackend, ContextError, ContextResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Public entry point for context storage.
///
/// Starts closed; call [`ContextStore::open`] before anything else. Every
/// other operation on a closed store fails with [`ContextError::NotOpen`].
pub struct ContextStore {
    backend: Box<dyn ContextBackend>,
    open: AtomicBool,
}

impl ContextStore {
    /// Create a store for `config`, cached or disk-direct per `config.cache`.
    pub fn new(config: &ContextConfig) -> Self {
        let files = FileStore::new(config.storage_dir());
        let backend: Box<dyn ContextBackend> = if config.cache {
            Box::new(MemoryCache::new(files))
        } else {
            Box::new(DiskStore::new(files))
        };
        Self::with_backend(backend)
    }

    /// Create a store over an existing backend.
    pub fn with_backend(backend: Box<dyn ContextBackend>) -> Self {
        Self {
            backend,
            open: AtomicBool::new(false),
        }
    }

    /// Whether `open()` has completed and `close()` has not been called since.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> ContextResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ContextError::NotOpen)
        }
    }

    /// Open the store. For a cached store this loads every scope from disk.
    pub async fn open(&self) -> ContextResult<()> {
        self.backend.open().await?;
        self.open.store(true, Ordering::Release);
        info!("Context store opened");
        Ok(())
    }

    /// Flush pending writes and close the store. Closing twice is a no-op.
    pub async fn close(&self) -> ContextResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.backend.close().await?;
        info!("Context store closed");
        Ok(())
    }

    /// Read the value at `path` in `scope`, or `None` if nothing is there.
    pub async fn get(&self, scope: &str, path: &str) -> ContextResult<Option<Value>> {
        self.ensure_open()?;
        self.backend.get(scope, path).await
    }

    /// Read without suspending.
    ///
    /// Fails immediately with [`ContextError::CacheRequired`] on a
    /// disk-direct store.
    pub fn get_now(&self, scope: &str, path: &str) -> ContextResult<Option<Value>> {
        self.ensure_open()?;
        self.backend.get_now(scope, path)
    }

    /// Store `value` at `path` in `scope`; `None` deletes the property.
    ///
    /// Errors, including an invalid path, arrive through the returned handle.
    pub fn set(&self, scope: &str, path: &str, value: impl Into<Option<Value>>) -> PendingWrite {
        if let Err(e) = self.ensure_open() {
            return PendingWrite::ready(Err(e));
        }
        self.backend.set(scope, path, value.into())
    }

    /// Top-level property names of `scope` in insertion order.
    pub async fn keys(&self, scope: &str) -> ContextResult<Vec<String>> {
        self.ensure_open()?;
        self.backend.keys(scope).await
    }

    /// List keys without suspending. Requires a cached store.
    pub fn keys_now(&self, scope: &str) -> ContextResult<Vec<String>> {
        self.ensure_open()?;
        self.backend.keys_now(scope)
    }

    /// Remove `scope` and its backing file.
    pub async fn delete(&self, scope: &str) -> ContextResult<()> {
        self.ensure_open()?;
        self.backend.delete(scope).await
    }

    /// Remove all data for containers not listed in `active`, except `global`.
    pub async fn clean(&self, active: &[String]) -> ContextResult<()> {
        self.ensure_open()?;
        self.backend.clean(active).await
    }
}
