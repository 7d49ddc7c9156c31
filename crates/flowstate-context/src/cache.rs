//! In-memory cached backend.
//!
//! Every scope found on disk is loaded at `open()`. Reads are served from
//! memory without suspending; each `set` updates memory first and then queues
//! a save of the whole scope through the [`FileStore`].

use crate::file::FileStore;
use crate::pending::PendingWrite;
use crate::property::{self, PropertyPath, Tree};
use crate::scope::{self, ScopeLocation};
use crate::{ContextBackend, ContextError, ContextResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct CacheEntry {
    tree: Tree,
    /// Set by every change, cleared once the save of that change lands.
    dirty: bool,
    /// Stamp of the latest change, unique across every entry the cache has held.
    revision: u64,
}

type Entries = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Cached context backend.
pub struct MemoryCache {
    files: FileStore,
    entries: Entries,
    revisions: AtomicU64,
}

impl MemoryCache {
    /// Create a cache persisting through `files`.
    pub fn new(files: FileStore) -> Self {
        Self {
            files,
            entries: Arc::new(RwLock::new(HashMap::new())),
            revisions: AtomicU64::new(0),
        }
    }

    /// Whether `scope` has changes not yet confirmed on disk.
    pub fn is_dirty(&self, scope: &str) -> bool {
        self.read_entries()
            .map(|entries| entries.get(scope).is_some_and(|entry| entry.dirty))
            .unwrap_or(false)
    }

    fn read_entries(&self) -> ContextResult<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .read()
            .map_err(|e| ContextError::LockPoisoned(e.to_string()))
    }

    fn write_entries(&self) -> ContextResult<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .write()
            .map_err(|e| ContextError::LockPoisoned(e.to_string()))
    }

    fn try_set(
        &self,
        scope: &str,
        path: &str,
        value: Option<Value>,
    ) -> ContextResult<PendingWrite> {
        let location = ScopeLocation::resolve(scope)?;
        let path = PropertyPath::parse(path)?;

        let mut entries = self.write_entries()?;
        if value.is_none() && !entries.contains_key(scope) {
            return Ok(PendingWrite::ready(Ok(())));
        }
        let entry = entries.entry(scope.to_string()).or_default();
        if !property::set(&mut entry.tree, &path, value)? {
            return Ok(PendingWrite::ready(Ok(())));
        }
        // A scope deleted and written again must not inherit old stamps.
        let revision = self.revisions.fetch_add(1, Ordering::Relaxed) + 1;
        entry.dirty = true;
        entry.revision = revision;

        // Queued under the lock so saves reach the file in revision order.
        let saved = self.files.save(&location, entry.tree.clone());
        drop(entries);

        Ok(self.track(scope.to_string(), revision, saved))
    }

    /// Clear the dirty flag once `saved` lands, unless a newer change exists.
    fn track(&self, scope: String, revision: u64, saved: PendingWrite) -> PendingWrite {
        let entries = Arc::clone(&self.entries);
        let (tx, rx) = oneshot::channel();
        let target = scope.clone();

        tokio::spawn(async move {
            let result = saved.wait().await;
            if result.is_ok() {
                if let Ok(mut entries) = entries.write() {
                    if let Some(entry) = entries.get_mut(&scope) {
                        if entry.revision == revision {
                            entry.dirty = false;
                        }
                    }
                }
            }
            let _ = tx.send(result);
        });

        PendingWrite::waiting(target, rx)
    }
}

#[async_trait]
impl ContextBackend for MemoryCache {
    async fn open(&self) -> ContextResult<()> {
        let mut loaded = HashMap::new();
        for location in self.files.discover().await? {
            let tree = self.files.load(&location).await?;
            debug!(scope = %location.scope_id(), keys = tree.len(), "Loaded scope into cache");
            loaded.insert(
                location.scope_id(),
                CacheEntry {
                    tree,
                    ..Default::default()
                },
            );
        }

        let count = loaded.len();
        *self.write_entries()? = loaded;
        info!(root = %self.files.root().display(), scopes = count, "Context cache loaded");
        Ok(())
    }

    async fn close(&self) -> ContextResult<()> {
        self.files.flush().await?;

        // Anything still dirty had its background save fail; retry once.
        let dirty: Vec<(String, Tree)> = self
            .read_entries()?
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(scope, entry)| (scope.clone(), entry.tree.clone()))
            .collect();
        for (scope, tree) in dirty {
            let location = ScopeLocation::resolve(&scope)?;
            self.files.save(&location, tree).await?;
        }

        self.write_entries()?.clear();
        Ok(())
    }

    async fn get(&self, scope: &str, path: &str) -> ContextResult<Option<Value>> {
        self.get_now(scope, path)
    }

    fn set(&self, scope: &str, path: &str, value: Option<Value>) -> PendingWrite {
        self.try_set(scope, path, value)
            .unwrap_or_else(|e| PendingWrite::ready(Err(e)))
    }

    async fn keys(&self, scope: &str) -> ContextResult<Vec<String>> {
        self.keys_now(scope)
    }

    async fn delete(&self, scope: &str) -> ContextResult<()> {
        let location = ScopeLocation::resolve(scope)?;
        self.write_entries()?.remove(scope);
        self.files.remove(&location).await
    }

    async fn clean(&self, active: &[String]) -> ContextResult<()> {
        self.write_entries()?.retain(|scope, _| {
            ScopeLocation::resolve(scope)
                .map(|location| scope::is_retained(location.container(), active))
                .unwrap_or(false)
        });
        self.files.clean(active).await?;
        Ok(())
    }

    /// Served from memory only. A scope without an entry reads as empty,
    /// since `open()` loaded every scope on disk and the storage root belongs
    /// to this store alone, so nothing else can add files behind its back.
    fn get_now(&self, scope: &str, path: &str) -> ContextResult<Option<Value>> {
        ScopeLocation::resolve(scope)?;
        let path = PropertyPath::parse(path)?;
        let entries = self.read_entries()?;
        Ok(entries
            .get(scope)
            .and_then(|entry| property::get(&entry.tree, &path))
            .cloned())
    }

    fn keys_now(&self, scope: &str) -> ContextResult<Vec<String>> {
        ScopeLocation::resolve(scope)?;
        let entries = self.read_entries()?;
        Ok(entries
            .get(scope)
            .map(|entry| entry.tree.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_file(root: &std::path::Path, file: &str, content: &str) {
        let path = root.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_open_loads_every_scope() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "global/global.json", r#"{"key": "global"}"#);
        write_file(dir.path(), "flow/flow.json", r#"{"key": "flow"}"#);
        write_file(dir.path(), "flow/node.json", r#"{"key": "node"}"#);

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        std::fs::remove_dir_all(dir.path().join("global")).unwrap();
        std::fs::remove_dir_all(dir.path().join("flow")).unwrap();

        assert_eq!(cache.get_now("global", "key").unwrap(), Some(json!("global")));
        assert_eq!(cache.get_now("flow", "key").unwrap(), Some(json!("flow")));
        assert_eq!(cache.get_now("node:flow", "key").unwrap(), Some(json!("node")));
    }

    #[tokio::test]
    async fn test_open_fails_on_corrupt_file() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "flowA/flow.json", "{abc");

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        assert!(cache.open().await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_open_treats_empty_file_as_empty_scope() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "flowA/flow.json", "");

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        assert!(cache.keys_now("flowA").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_is_visible_before_persisting() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        let pending = cache.set("global", "foo.bar", Some(json!("baz")));
        assert_eq!(
            cache.get_now("global", "foo").unwrap(),
            Some(json!({"bar": "baz"}))
        );
        assert!(cache.is_dirty("global"));

        pending.await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("global/global.json")).unwrap();
        let on_disk: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(on_disk, json!({"foo": {"bar": "baz"}}));
    }

    #[tokio::test]
    async fn test_dirty_cleared_after_latest_save() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        let first = cache.set("flowA", "a", Some(json!(1)));
        let second = cache.set("flowA", "b", Some(json!(2)));
        first.await.unwrap();
        second.await.unwrap();
        assert!(!cache.is_dirty("flowA"));
    }

    #[tokio::test]
    async fn test_keys_reflect_unsaved_writes() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "global/global.json", r#"{"foo": "bar"}"#);

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        assert_eq!(cache.keys_now("global").unwrap(), vec!["foo"]);

        let _pending = cache.set("global", "foo2", Some(json!("bar2")));
        assert_eq!(cache.keys_now("global").unwrap(), vec!["foo", "foo2"]);
        assert!(cache.keys_now("unknown").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_path_reported_through_handle() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        let err = cache.set("global", " ", Some(json!(1))).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidPath { .. }));
        assert!(matches!(
            cache.get_now("global", "a..b"),
            Err(ContextError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_scope_writes_nothing() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        cache.set("flowA", "foo", None).await.unwrap();
        assert!(!dir.path().join("flowA").exists());
    }

    #[tokio::test]
    async fn test_delete_removes_entry_and_file() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        cache.set("global", "foo", Some(json!("bar"))).await.unwrap();
        cache.delete("global").await.unwrap();

        assert_eq!(cache.get_now("global", "foo").unwrap(), None);
        assert!(!dir.path().join("global/global.json").exists());
    }

    #[tokio::test]
    async fn test_clean_drops_inactive_containers() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "flowA/flow.json", r#"{"key": "flowA"}"#);
        write_file(dir.path(), "flowB/flow.json", r#"{"key": "flowB"}"#);
        write_file(dir.path(), "flowB/n1.json", r#"{"key": "n1"}"#);
        write_file(dir.path(), "global/global.json", r#"{"key": "global"}"#);

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        cache.clean(&["flowA".to_string()]).await.unwrap();

        assert_eq!(cache.get_now("flowA", "key").unwrap(), Some(json!("flowA")));
        assert_eq!(cache.get_now("flowB", "key").unwrap(), None);
        assert_eq!(cache.get_now("n1:flowB", "key").unwrap(), None);
        assert_eq!(cache.get_now("global", "key").unwrap(), Some(json!("global")));
        assert!(!dir.path().join("flowB").exists());
    }

    #[tokio::test]
    async fn test_close_flushes_and_empties() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        // Fire and forget; close must still persist it.
        let _ = cache.set("flowA", "foo", Some(json!("bar")));
        cache.close().await.unwrap();

        assert_eq!(cache.get_now("flowA", "foo").unwrap(), None);
        cache.open().await.unwrap();
        assert_eq!(cache.get_now("flowA", "foo").unwrap(), Some(json!("bar")));
    }

    #[tokio::test]
    async fn test_recreated_scope_gets_fresh_revision() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        let first = cache.set("flowA", "a", Some(json!(1)));
        let old = cache.read_entries().unwrap()["flowA"].revision;
        cache.write_entries().unwrap().remove("flowA");
        let second = cache.set("flowA", "b", Some(json!(2)));
        let new = cache.read_entries().unwrap()["flowA"].revision;
        assert!(new > old);

        first.await.unwrap();
        second.await.unwrap();
        assert!(!cache.is_dirty("flowA"));
    }

    #[tokio::test]
    async fn test_failed_save_reported_and_retried_on_close() {
        let dir = tempdir().unwrap();
        // A plain file where the container directory should go.
        write_file(dir.path(), "flowA", "in the way");

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();

        let err = cache.set("flowA", "foo", Some(json!("bar"))).await.unwrap_err();
        assert!(matches!(err, ContextError::Io(_)));
        assert!(cache.is_dirty("flowA"));
        assert_eq!(cache.get_now("flowA", "foo").unwrap(), Some(json!("bar")));

        std::fs::remove_file(dir.path().join("flowA")).unwrap();
        cache.close().await.unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("flowA/flow.json")).unwrap();
        let on_disk: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(on_disk, json!({"foo": "bar"}));
    }

    #[tokio::test]
    async fn test_close_reports_failed_retry() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "flowA", "in the way");

        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        let _ = cache.set("flowA", "foo", Some(json!("bar"))).await;

        assert!(matches!(cache.close().await, Err(ContextError::Io(_))));
        assert!(cache.is_dirty("flowA"));
    }

    #[tokio::test]
    async fn test_invalid_index_leaves_cache_usable() {
        let dir = tempdir().unwrap();
        let cache = MemoryCache::new(FileStore::new(dir.path()));
        cache.open().await.unwrap();
        cache.set("nodeX", "foo", Some(json!([1]))).await.unwrap();

        let err = cache
            .set("nodeX", "foo[18446744073709551615]", Some(json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidPath { .. }));
        assert!(!cache.is_dirty("nodeX"));
        assert_eq!(cache.get_now("nodeX", "foo").unwrap(), Some(json!([1])));
    }
}
