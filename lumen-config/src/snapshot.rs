//! The immutable result of one successful load cycle.

use crate::document::{Node, Origin};
use crate::error::ConfigError;
use crate::merge::MergedConfig;
use crate::themes::ResolvedTheme;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Monotonically increasing snapshot identifier. The first successful load
/// is generation 1.
pub type Generation = u64;

/// Shared read-only handle to a snapshot. A generation lives until the last
/// handle to it is dropped.
pub type SnapshotRef = Arc<ConfigSnapshot>;

/// Typed view of the keys the engine itself acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Selected theme; `None` selects the default theme.
    #[serde(default)]
    pub theme: Option<String>,

    #[serde(default)]
    pub watch: WatchSettings,
}

/// Live-reload settings (`watch` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchSettings {
    #[serde(default = "crate::defaults::watch_enabled")]
    pub enabled: bool,

    /// Quiet period after the last file event before reloading.
    #[serde(default = "crate::defaults::debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: crate::defaults::watch_enabled(),
            debounce_ms: crate::defaults::debounce_ms(),
        }
    }
}

/// Validated configuration plus its resolved theme.
///
/// Never mutated after construction; a reload produces a new snapshot.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    generation: Generation,
    merged: MergedConfig,
    settings: Settings,
    theme: ResolvedTheme,
    sources: Vec<Origin>,
    loaded_at: SystemTime,
}

impl ConfigSnapshot {
    pub(crate) fn new(
        generation: Generation,
        merged: MergedConfig,
        settings: Settings,
        theme: ResolvedTheme,
        sources: Vec<Origin>,
    ) -> Self {
        Self {
            generation,
            merged,
            settings,
            theme,
            sources,
            loaded_at: SystemTime::now(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn merged(&self) -> &MergedConfig {
        &self.merged
    }

    /// The merged tree.
    pub fn root(&self) -> &Node {
        self.merged.root()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn theme(&self) -> &ResolvedTheme {
        &self.theme
    }

    /// Layers that went into this snapshot, lowest rank first.
    pub fn sources(&self) -> &[Origin] {
        &self.sources
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Value at a dotted path (`fields.predefined.level.names`).
    pub fn get(&self, dotted: &str) -> Option<&Node> {
        self.merged.get(dotted)
    }

    /// Convert the section at `dotted` into a typed record.
    pub fn section<T: DeserializeOwned>(&self, dotted: &str) -> Result<T, ConfigError> {
        let node = self.get(dotted).ok_or_else(|| ConfigError::Conversion {
            path: dotted.to_string(),
            message: "no such section".to_string(),
        })?;
        node.to_typed().map_err(|e| ConfigError::Conversion {
            path: dotted.to_string(),
            message: e.to_string(),
        })
    }
}
