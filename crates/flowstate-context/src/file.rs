//! JSON file persistence for scope trees.
//!
//! Every backing file gets its own write queue: a worker task fed by an
//! unbounded channel, spawned on the first job and torn down once the
//! channel is empty. Jobs for one file run strictly one at a time in
//! submission order, so a save can never interleave with another save,
//! a read-modify-write, or a removal of the same file.

use crate::pending::PendingWrite;
use crate::property::Tree;
use crate::scope::{self, ScopeLocation};
use crate::{ContextError, ContextResult};
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Edits a loaded tree in place; the file is rewritten only if it returns
/// `Ok(true)`. An error is handed back to the caller and nothing is written.
pub type Editor = Box<dyn FnOnce(&mut Tree) -> ContextResult<bool> + Send>;

type Queues = Arc<Mutex<HashMap<PathBuf, mpsc::UnboundedSender<Job>>>>;

enum Job {
    Load(oneshot::Sender<ContextResult<Tree>>),
    Save(Tree, oneshot::Sender<ContextResult<()>>),
    Update(Editor, oneshot::Sender<ContextResult<()>>),
    Remove(oneshot::Sender<ContextResult<()>>),
    Barrier(oneshot::Sender<ContextResult<()>>),
}

/// File-backed storage of scope trees under a root directory.
///
/// All methods must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    queues: Queues,
}

impl FileStore {
    /// Create a file store rooted at `root` (the `contexts` directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The directory holding all containers.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a scope's tree after every write already queued for its file.
    ///
    /// A missing or empty file yields an empty tree.
    pub async fn load(&self, location: &ScopeLocation) -> ContextResult<Tree> {
        let path = location.file_path(&self.root);
        let (tx, rx) = oneshot::channel();
        self.submit(path.clone(), Job::Load(tx));
        rx.await.unwrap_or_else(|_| Err(queue_closed(&path)))
    }

    /// Queue a full replacement of a scope's file.
    pub fn save(&self, location: &ScopeLocation, tree: Tree) -> PendingWrite {
        let path = location.file_path(&self.root);
        let (tx, rx) = oneshot::channel();
        self.submit(path.clone(), Job::Save(tree, tx));
        PendingWrite::waiting(path.display().to_string(), rx)
    }

    /// Queue a read-modify-write of a scope's file.
    pub fn update(&self, location: &ScopeLocation, editor: Editor) -> PendingWrite {
        let path = location.file_path(&self.root);
        let (tx, rx) = oneshot::channel();
        self.submit(path.clone(), Job::Update(editor, tx));
        PendingWrite::waiting(path.display().to_string(), rx)
    }

    /// Delete a scope's file once its queued writes have run.
    ///
    /// The container directory goes too when this was its last file.
    pub async fn remove(&self, location: &ScopeLocation) -> ContextResult<()> {
        self.remove_path(location.file_path(&self.root)).await
    }

    /// Wait for every job queued so far to finish.
    pub async fn flush(&self) -> ContextResult<()> {
        let paths: Vec<PathBuf> = lock(&self.queues).keys().cloned().collect();
        for path in paths {
            let (tx, rx) = oneshot::channel();
            self.submit(path.clone(), Job::Barrier(tx));
            rx.await.unwrap_or_else(|_| Err(queue_closed(&path)))?;
        }
        Ok(())
    }

    /// Names of all containers, on disk or with writes still queued.
    pub async fn containers(&self) -> ContextResult<Vec<String>> {
        let mut names: BTreeSet<String> = self
            .queued_paths()
            .iter()
            .filter_map(|path| path.parent()?.file_name()?.to_str().map(str::to_string))
            .collect();

        match fs::read_dir(&self.root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if !entry.file_type().await?.is_dir() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        names.insert(name.to_string());
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ContextError::Io(e)),
        }

        Ok(names.into_iter().collect())
    }

    /// Names of the `.json` files currently on disk in `container`.
    pub async fn scope_files(&self, container: &str) -> ContextResult<Vec<String>> {
        let dir = self.root.join(container);
        let mut files = BTreeSet::new();

        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "json") {
                        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                            files.insert(name.to_string());
                        }
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ContextError::Io(e)),
        }

        Ok(files.into_iter().collect())
    }

    /// Every scope with a backing file on disk.
    pub async fn discover(&self) -> ContextResult<Vec<ScopeLocation>> {
        let mut found = Vec::new();
        for container in self.containers().await? {
            for file in self.scope_files(&container).await? {
                match ScopeLocation::from_file(&container, &file) {
                    Some(location) => found.push(location),
                    None => debug!(container = %container, file = %file, "Skipping unrecognised file"),
                }
            }
        }
        Ok(found)
    }

    /// Delete a container and every scope file in it.
    ///
    /// Writes already queued for those files run first, so none of them can
    /// recreate a file after the container is gone.
    pub async fn remove_container(&self, container: &str) -> ContextResult<()> {
        let dir = self.root.join(container);
        let mut paths: BTreeSet<PathBuf> = self
            .scope_files(container)
            .await?
            .into_iter()
            .map(|file| dir.join(file))
            .collect();
        paths.extend(
            self.queued_paths()
                .into_iter()
                .filter(|path| path.parent() == Some(dir.as_path())),
        );

        for path in paths {
            self.remove_path(path).await?;
        }

        debug!(path = %dir.display(), "Removing context container");
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContextError::Io(e)),
        }
    }

    /// Remove every container not listed in `active`, except `global`.
    ///
    /// Returns the names of the removed containers.
    pub async fn clean(&self, active: &[String]) -> ContextResult<Vec<String>> {
        let mut removed = Vec::new();
        for container in self.containers().await? {
            if scope::is_retained(&container, active) {
                continue;
            }
            self.remove_container(&container).await?;
            removed.push(container);
        }
        info!(root = %self.root.display(), removed = removed.len(), "Cleaned context containers");
        Ok(removed)
    }

    async fn remove_path(&self, path: PathBuf) -> ContextResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(path.clone(), Job::Remove(tx));
        rx.await.unwrap_or_else(|_| Err(queue_closed(&path)))
    }

    fn queued_paths(&self) -> Vec<PathBuf> {
        lock(&self.queues).keys().cloned().collect()
    }

    fn submit(&self, path: PathBuf, job: Job) {
        let mut queues = lock(&self.queues);
        let job = match queues.get(&path) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // The worker died; start a fresh one below.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(job);
        queues.insert(path.clone(), sender);
        tokio::spawn(drain(path, receiver, Arc::clone(&self.queues)));
    }
}

fn lock(queues: &Queues) -> MutexGuard<'_, HashMap<PathBuf, mpsc::UnboundedSender<Job>>> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}

fn queue_closed(path: &Path) -> ContextError {
    ContextError::QueueClosed(path.display().to_string())
}

/// Run the jobs queued for one file until its channel is empty.
///
/// The emptiness check and the queue removal happen under the same lock
/// `submit` sends under, so no job can slip in between them.
async fn drain(path: PathBuf, mut jobs: mpsc::UnboundedReceiver<Job>, queues: Queues) {
    loop {
        let job = {
            let mut queues = lock(&queues);
            match jobs.try_recv() {
                Ok(job) => job,
                Err(_) => {
                    queues.remove(&path);
                    return;
                }
            }
        };
        run(&path, job).await;
    }
}

async fn run(path: &Path, job: Job) {
    match job {
        Job::Load(reply) => {
            let _ = reply.send(read_tree(path).await);
        }
        Job::Save(tree, reply) => {
            let result = write_tree(path, &tree).await;
            report(path, &result);
            let _ = reply.send(result);
        }
        Job::Update(editor, reply) => {
            let result = update_tree(path, editor).await;
            report(path, &result);
            let _ = reply.send(result);
        }
        Job::Remove(reply) => {
            let _ = reply.send(remove_file(path).await);
        }
        Job::Barrier(reply) => {
            let _ = reply.send(Ok(()));
        }
    }
}

fn report(path: &Path, result: &ContextResult<()>) {
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to write context file");
    }
}

async fn read_tree(path: &Path) -> ContextResult<Tree> {
    debug!(path = %path.display(), "Reading context file");

    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Tree::new()),
        Err(e) => return Err(ContextError::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(Tree::new());
    }

    serde_json::from_str(&content).map_err(|source| ContextError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}

async fn write_tree(path: &Path, tree: &Tree) -> ContextResult<()> {
    debug!(path = %path.display(), "Writing context file");

    let content = serde_json::to_string_pretty(tree)?;
    let temp_path = path.with_extension("json.tmp");

    // Write atomically (write to temp file, then rename)
    create_parent(path).await?;
    if let Err(e) = fs::write(&temp_path, &content).await {
        if e.kind() != ErrorKind::NotFound {
            return Err(ContextError::Io(e));
        }
        // A sibling removal pruned the container in between.
        create_parent(path).await?;
        fs::write(&temp_path, &content).await?;
    }
    fs::rename(&temp_path, path).await?;

    Ok(())
}

async fn update_tree(path: &Path, editor: Editor) -> ContextResult<()> {
    let mut tree = read_tree(path).await?;
    if !editor(&mut tree)? {
        return Ok(());
    }
    write_tree(path, &tree).await
}

async fn create_parent(path: &Path) -> ContextResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn remove_file(path: &Path) -> ContextResult<()> {
    debug!(path = %path.display(), "Removing context file");

    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(ContextError::Io(e)),
    }
    if let Some(dir) = path.parent() {
        prune_dir(dir).await;
    }
    Ok(())
}

/// Remove `dir` if it has no entries left.
async fn prune_dir(dir: &Path) {
    let empty = match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    };
    if empty {
        if let Err(e) = fs::remove_dir(dir).await {
            debug!(path = %dir.display(), error = %e, "Container not pruned");
        }
    }
}
