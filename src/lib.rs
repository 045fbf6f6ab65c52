// Library exports for testing and potential library use
//
// Configuration loading, merging, validation and theme resolution live in
// the `lumen-config` sub-crate; this crate is the command-line front end.

/// Application version (root crate version, for use by sub-crates).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod commands;
pub mod debug;

pub use lumen_config as config;
