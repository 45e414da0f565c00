//! Configuration paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/crds-e2e/`
//! - macOS: `~/Library/Application Support/crds-e2e/`
//! - Windows: `%APPDATA%\crds-e2e\`

use std::path::PathBuf;

/// Application name used for directory lookups
const APP_NAME: &str = "crds-e2e";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user-level configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
