//! Disk-direct backend.
//!
//! Nothing is held in memory between calls: each read loads the scope's file
//! and each write is a read-modify-write queued on that file, so reads always
//! observe every write submitted before them.

use crate::file::FileStore;
use crate::pending::PendingWrite;
use crate::property::{self, PropertyPath, Tree};
use crate::scope::ScopeLocation;
use crate::{ContextBackend, ContextResult};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Uncached context backend.
#[derive(Clone)]
pub struct DiskStore {
    files: FileStore,
}

impl DiskStore {
    /// Create a disk-direct backend over `files`.
    pub fn new(files: FileStore) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ContextBackend for DiskStore {
    async fn open(&self) -> ContextResult<()> {
        debug!(root = %self.files.root().display(), "Opened disk context store");
        Ok(())
    }

    async fn close(&self) -> ContextResult<()> {
        self.files.flush().await
    }

    async fn get(&self, scope: &str, path: &str) -> ContextResult<Option<Value>> {
        let location = ScopeLocation::resolve(scope)?;
        let path = PropertyPath::parse(path)?;
        let tree = self.files.load(&location).await?;
        Ok(property::get(&tree, &path).cloned())
    }

    fn set(&self, scope: &str, path: &str, value: Option<Value>) -> PendingWrite {
        let resolved = ScopeLocation::resolve(scope)
            .and_then(|location| Ok((location, PropertyPath::parse(path)?)));
        match resolved {
            Ok((location, path)) => self.files.update(
                &location,
                Box::new(move |tree: &mut Tree| property::set(tree, &path, value)),
            ),
            Err(e) => PendingWrite::ready(Err(e)),
        }
    }

    async fn keys(&self, scope: &str) -> ContextResult<Vec<String>> {
        let location = ScopeLocation::resolve(scope)?;
        let tree = self.files.load(&location).await?;
        Ok(tree.keys().cloned().collect())
    }

    async fn delete(&self, scope: &str) -> ContextResult<()> {
        let location = ScopeLocation::resolve(scope)?;
        self.files.remove(&location).await
    }

    async fn clean(&self, active: &[String]) -> ContextResult<()> {
        self.files.clean(active).await?;
        Ok(())
    }
}
