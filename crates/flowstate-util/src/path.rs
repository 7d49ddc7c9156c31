//! Path utilities.
//!
//! This module resolves the flowstate user directory, the root under which
//! runtime data such as context stores is kept.

use std::path::PathBuf;

/// Environment variable naming an explicit flowstate home.
pub const HOME_ENV: &str = "FLOWSTATE_HOME";

/// Directory created under the user's home.
pub const USER_DIR_NAME: &str = ".flowstate";

/// File whose presence marks a directory as an initialised user directory.
pub const CONFIG_MARKER: &str = ".config.json";

/// Get the flowstate user directory from the process environment.
///
/// See [`user_dir_with`] for the lookup order.
pub fn user_dir() -> PathBuf {
    user_dir_with(|name| std::env::var(name).ok())
}

/// Get the flowstate user directory using `env` to read variables.
///
/// In order of precedence:
/// - `$FLOWSTATE_HOME` if it contains `.config.json`
/// - `$HOMEPATH/.flowstate` if that contains `.config.json`
/// - `.flowstate` under `$HOME`, `$USERPROFILE`, `$HOMEPATH` or the platform
///   home directory, whichever is found first
/// - `.flowstate` relative to the working directory
pub fn user_dir_with<F>(env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env(name).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(home) = lookup(HOME_ENV) {
        if home.join(CONFIG_MARKER).exists() {
            return home;
        }
    }

    if let Some(home_path) = lookup("HOMEPATH") {
        let legacy = home_path.join(USER_DIR_NAME);
        if legacy.join(CONFIG_MARKER).exists() {
            return legacy;
        }
    }

    lookup("HOME")
        .or_else(|| lookup("USERPROFILE"))
        .or_else(|| lookup("HOMEPATH"))
        .or_else(dirs::home_dir)
        .map(|home| home.join(USER_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(USER_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env_of(vars: &[(&str, &std::path::Path)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.display().to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_flowstate_home_with_marker_wins() {
        let home = tempdir().unwrap();
        let other = tempdir().unwrap();
        std::fs::write(home.path().join(CONFIG_MARKER), "").unwrap();

        let dir = user_dir_with(env_of(&[(HOME_ENV, home.path()), ("HOME", other.path())]));
        assert_eq!(dir, home.path());
    }

    #[test]
    fn test_flowstate_home_without_marker_is_ignored() {
        let home = tempdir().unwrap();
        let other = tempdir().unwrap();

        let dir = user_dir_with(env_of(&[(HOME_ENV, home.path()), ("HOME", other.path())]));
        assert_eq!(dir, other.path().join(USER_DIR_NAME));
    }

    #[test]
    fn test_homepath_with_marker() {
        let home_path = tempdir().unwrap();
        let other = tempdir().unwrap();
        let legacy = home_path.path().join(USER_DIR_NAME);
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join(CONFIG_MARKER), "").unwrap();

        let dir = user_dir_with(env_of(&[
            (HOME_ENV, other.path()),
            ("HOMEPATH", home_path.path()),
            ("HOME", other.path()),
        ]));
        assert_eq!(dir, legacy);
    }

    #[test]
    fn test_home_fallback() {
        let home = tempdir().unwrap();
        let dir = user_dir_with(env_of(&[("HOME", home.path())]));
        assert_eq!(dir, home.path().join(USER_DIR_NAME));
    }

    #[test]
    fn test_userprofile_before_homepath() {
        let profile = tempdir().unwrap();
        let home_path = tempdir().unwrap();
        let dir = user_dir_with(env_of(&[
            ("USERPROFILE", profile.path()),
            ("HOMEPATH", home_path.path()),
        ]));
        assert_eq!(dir, profile.path().join(USER_DIR_NAME));
    }

    #[test]
    fn test_empty_variables_are_skipped() {
        let dir = user_dir_with(|name| (name == "HOME").then(String::new));
        assert!(dir.ends_with(USER_DIR_NAME));
    }
}
