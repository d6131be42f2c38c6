/// Platform-specific location of the configuration file
///
/// Unix-like systems follow the XDG Base Directory specification.
use std::path::{Path, PathBuf};

/// Directory name used under the platform config directory
pub const APP_DIR_NAME: &str = "diff-context";

/// File name of the configuration inside [`APP_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Base config directory for the current platform
    ///
    /// - Windows: %APPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_CONFIG_HOME or ~/.config
    ///
    /// Falls back to the working directory when none of the variables is set.
    pub fn config_dir() -> PathBuf {
        let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty());
        let home = || var("HOME").map(PathBuf::from);

        let dir = if cfg!(target_os = "windows") {
            var("APPDATA").map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home().map(|h| h.join("Library/Application Support"))
        } else {
            var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|| home().map(|h| h.join(".config")))
        };
        dir.unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns: {config_dir}/diff-context
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR_NAME)
    }

    /// Returns: {config_dir}/diff-context/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join(CONFIG_FILE_NAME)
    }

    /// Repository-local config file, consulted before the platform one
    pub fn repo_config_path(repo: &Path) -> PathBuf {
        repo.join(format!(".{}.toml", APP_DIR_NAME))
    }
}
