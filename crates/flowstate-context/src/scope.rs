//! Mapping between scope identifiers and backing files.
//!
//! - `global` -> `global/global.json`
//! - `<flowId>` -> `<flowId>/flow.json`
//! - `<nodeId>:<flowId>` -> `<flowId>/<nodeId>.json`

use crate::{ContextError, ContextResult};
use std::path::{Path, PathBuf};

/// Scope id and container name of the global context.
pub const GLOBAL_SCOPE: &str = "global";

/// File stem used for a flow-level scope inside its container.
const FLOW_FILE_STEM: &str = "flow";

const EXTENSION: &str = "json";

/// Where a scope lives on disk, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeLocation {
    container: String,
    node: Option<String>,
}

impl ScopeLocation {
    /// Resolve a scope identifier.
    pub fn resolve(scope: &str) -> ContextResult<Self> {
        let (node, container) = match scope.split_once(':') {
            Some((node, flow)) => (Some(node), flow),
            None => (None, scope),
        };

        validate_component(scope, container)?;
        if let Some(node) = node {
            validate_component(scope, node)?;
            if node == FLOW_FILE_STEM {
                return Err(ContextError::invalid_scope(
                    scope,
                    "node id 'flow' is reserved",
                ));
            }
            if node == GLOBAL_SCOPE && container == GLOBAL_SCOPE {
                return Err(ContextError::invalid_scope(
                    scope,
                    "node id 'global' is reserved in the global container",
                ));
            }
        }

        Ok(Self {
            container: container.to_string(),
            node: node.map(str::to_string),
        })
    }

    /// Map a file discovered inside `container` back to its scope.
    ///
    /// Returns `None` for files that no scope id resolves to.
    pub fn from_file(container: &str, file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        let location = match (container == GLOBAL_SCOPE, stem) {
            (true, GLOBAL_SCOPE) => Self::global(),
            (true, FLOW_FILE_STEM) => return None,
            (false, FLOW_FILE_STEM) => Self {
                container: container.to_string(),
                node: None,
            },
            _ => Self {
                container: container.to_string(),
                node: Some(stem.to_string()),
            },
        };
        // Names a scope id could never produce are skipped.
        Self::resolve(&location.scope_id())
            .ok()
            .filter(|resolved| *resolved == location)
    }

    /// The global scope's location.
    pub fn global() -> Self {
        Self {
            container: GLOBAL_SCOPE.to_string(),
            node: None,
        }
    }

    /// Container directory name.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Node id for node-level scopes.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Whether this is the global scope.
    pub fn is_global(&self) -> bool {
        self.node.is_none() && self.container == GLOBAL_SCOPE
    }

    /// Backing file name within the container.
    pub fn file_name(&self) -> String {
        match &self.node {
            Some(node) => format!("{}.{}", node, EXTENSION),
            None if self.is_global() => format!("{}.{}", GLOBAL_SCOPE, EXTENSION),
            None => format!("{}.{}", FLOW_FILE_STEM, EXTENSION),
        }
    }

    /// The identifier that resolves to this location.
    pub fn scope_id(&self) -> String {
        match &self.node {
            Some(node) => format!("{}:{}", node, self.container),
            None => self.container.clone(),
        }
    }

    /// Full path of the backing file under `root`.
    pub fn file_path(&self, root: &Path) -> PathBuf {
        root.join(&self.container).join(self.file_name())
    }
}

/// Whether `clean` keeps `container` given the active container ids.
///
/// The global container is always kept.
pub fn is_retained(container: &str, active: &[String]) -> bool {
    container == GLOBAL_SCOPE || active.iter().any(|id| id == container)
}

fn validate_component(scope: &str, component: &str) -> ContextResult<()> {
    if component.is_empty() {
        return Err(ContextError::invalid_scope(scope, "empty scope component"));
    }
    if component == "."
        || component == ".."
        || component.contains(['/', '\\', ':'])
    {
        return Err(ContextError::invalid_scope(
            scope,
            "scope component is not a plain file name",
        ));
    }
    Ok(())
}
