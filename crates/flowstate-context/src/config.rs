//! Context store configuration.

use crate::ContextResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default name of the directory holding the containers.
pub const DEFAULT_BASE: &str = "contexts";

/// Settings the context store is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Root directory override; takes precedence over everything else.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Subdirectory of the root holding the containers.
    pub base: String,

    /// Keep every scope in memory and persist in the background.
    pub cache: bool,

    /// Runtime settings shared with the rest of the process.
    pub settings: RuntimeSettings,
}

/// The subset of runtime settings the store reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// The runtime's user directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_dir: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            dir: None,
            base: DEFAULT_BASE.to_string(),
            cache: false,
            settings: RuntimeSettings::default(),
        }
    }
}

impl ContextConfig {
    /// A disk-direct configuration rooted at `dir`.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Enable or disable the in-memory cache.
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Use a different container subdirectory.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(content: &str) -> ContextResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// The root directory, resolved against the process environment.
    pub fn root_dir(&self) -> PathBuf {
        self.root_dir_with(|name| std::env::var(name).ok())
    }

    /// The root directory, resolved with `env` supplying variables.
    ///
    /// `dir` wins over `settings.userDir`, which wins over the environment.
    pub fn root_dir_with<F>(&self, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        self.dir
            .clone()
            .or_else(|| self.settings.user_dir.clone())
            .unwrap_or_else(|| flowstate_util::path::user_dir_with(env))
    }

    /// The directory holding all containers: `<root>/<base>`.
    pub fn storage_dir(&self) -> PathBuf {
        self.root_dir().join(&self.base)
    }
}
