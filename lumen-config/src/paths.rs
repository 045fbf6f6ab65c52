//! Standard file locations.

use crate::env_vars::Environment;
use std::path::{Path, PathBuf};

/// Overrides the config directory when set.
pub const CONFIG_DIR_VAR: &str = "LUMEN_CONFIG_DIR";

/// Where lumen looks for user configuration.
///
/// ```text
/// <config dir>/
///   config.yaml        main user file
///   config.d/*.yaml    drop-ins, applied in file-name order
///   themes/*.yaml      user themes
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$LUMEN_CONFIG_DIR`, or the platform default.
    pub fn discover(environment: &Environment) -> Self {
        match environment.get(CONFIG_DIR_VAR).filter(|v| !v.is_empty()) {
            Some(dir) => Self::new(dir),
            None => Self::new(default_config_dir()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn dropin_dir(&self) -> PathBuf {
        self.root.join("config.d")
    }

    pub fn themes_dir(&self) -> PathBuf {
        self.root.join("themes")
    }
}

/// Get the configuration directory path (using XDG convention)
fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("lumen")
        } else {
            PathBuf::from(".")
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home_dir) = dirs::home_dir() {
            home_dir.join(".config").join("lumen")
        } else {
            PathBuf::from(".")
        }
    }
}
