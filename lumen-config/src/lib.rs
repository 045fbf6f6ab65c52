//! Configuration and theme resolution for the lumen log viewer.
//!
//! This crate turns layered YAML/TOML sources into one validated, immutable
//! snapshot. It includes:
//!
//! - Document loading (bundled defaults, user files, drop-ins, `LUMEN_*`
//!   environment overrides)
//! - Layer merging with per-path merge strategies
//! - Schema compilation and validation
//! - Theme catalog with inheritance and cycle detection
//! - Snapshot publication and reload coordination
//! - Config directory watching

pub mod coordinator;
pub mod defaults;
pub mod document;
pub mod env_vars;
pub mod error;
pub mod loader;
pub mod merge;
pub mod paths;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod themes;
#[cfg(feature = "watcher")]
pub mod watcher;

// Re-export main types for convenience
pub use coordinator::{ReloadCoordinator, ReloadError, ReloadState, Subscription};
#[cfg(feature = "watcher")]
pub use coordinator::WatchHandle;
pub use document::{Document, Node, NodePath, Origin, Rank};
pub use env_vars::Environment;
pub use error::{ConfigError, LoadFailure, SchemaError};
pub use loader::{DocumentLoader, SourceDescriptor};
pub use merge::{LayerStack, MergePolicies, MergeStrategy, MergedConfig, merge_layers};
pub use paths::ConfigPaths;
pub use pipeline::SnapshotBuilder;
pub use schema::{Schema, ValidationViolation};
pub use snapshot::{ConfigSnapshot, Generation, Settings, SnapshotRef, WatchSettings};
pub use themes::{Color, DEFAULT_THEME, ResolvedTheme, Style, StyleMode, ThemeCatalog};
