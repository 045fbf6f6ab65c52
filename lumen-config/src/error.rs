//! Typed error variants for the lumen-config crate.
//!
//! Every stage of a load cycle reports failures as [`ConfigError`] values.
//! Stages that can find several problems at once (loading several sources,
//! merging a whole tree, validating it, resolving themes) collect them, and
//! the cycle as a whole fails with a [`LoadFailure`] listing all of them so a
//! user can fix everything in one pass.

use crate::document::{NodePath, Origin};
use crate::schema::ValidationViolation;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 1-based position of a parse error inside a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

fn at_location(location: &Option<Location>) -> String {
    location.map(|l| format!(" at {l}")).unwrap_or_default()
}

/// Errors produced while loading, merging, validating or resolving
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required source is missing, or a source exists but cannot be read.
    #[error("cannot read '{}': {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed YAML/TOML syntax.
    #[error("{origin}: parse error{}: {message}", at_location(.location))]
    Parse {
        /// Source name (file path or logical name).
        origin: String,
        location: Option<Location>,
        message: String,
    },

    /// The source bytes are not valid UTF-8.
    #[error("{origin}: invalid encoding: {detail}")]
    Encoding { origin: String, detail: String },

    /// A drop-in pattern could not be compiled.
    #[error("invalid source pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Two documents were given the same precedence rank.
    #[error("sources '{first}' and '{second}' share precedence rank {rank}")]
    DuplicateRank {
        rank: u32,
        first: String,
        second: String,
    },

    /// Two layers supply incompatible values at the same path and no merge
    /// policy resolves it.
    #[error("merge conflict at {path}: {detail} ({} vs {})", .lower.source, .higher.source)]
    MergeConflict {
        path: NodePath,
        lower: Origin,
        higher: Origin,
        detail: String,
    },

    /// A schema rule failed on the merged tree or on a resolved theme.
    #[error("{0}")]
    Validation(ValidationViolation),

    /// A theme name (the selected theme or an `extends` parent) is not
    /// defined anywhere in the catalog.
    #[error("unknown theme '{name}'{}", describe_reference(.referenced_by.as_deref(), .origin.as_ref()))]
    UnknownTheme {
        name: String,
        referenced_by: Option<String>,
        /// Source that names the missing theme: the `extends` definition,
        /// or the layer that set `theme`.
        origin: Option<Origin>,
    },

    /// Theme inheritance loops back on itself.
    #[error("theme inheritance cycle: {}{}", .cycle.join(" -> "), describe_sources(.origins))]
    ThemeCycle {
        /// Names along the loop, first and last entry identical.
        cycle: Vec<String>,
        /// Where each member's `extends` is defined, in loop order.
        origins: Vec<Origin>,
    },

    /// A bundled or user-supplied schema document is itself invalid.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A validated tree could not be converted into its typed record.
    #[error("cannot convert {path} into typed settings: {message}")]
    Conversion { path: String, message: String },
}

impl From<ValidationViolation> for ConfigError {
    fn from(violation: ValidationViolation) -> Self {
        ConfigError::Validation(violation)
    }
}

fn describe_reference(referenced_by: Option<&str>, origin: Option<&Origin>) -> String {
    let mut text = String::new();
    if let Some(child) = referenced_by {
        text.push_str(&format!(" (extended by '{child}')"));
    }
    if let Some(origin) = origin {
        text.push_str(&format!(" in {}", origin.source));
    }
    text
}

fn describe_sources(origins: &[Origin]) -> String {
    let mut sources: Vec<&str> = Vec::new();
    for origin in origins {
        if !sources.contains(&origin.source.as_str()) {
            sources.push(&origin.source);
        }
    }
    if sources.is_empty() {
        String::new()
    } else {
        format!(" (defined in {})", sources.join(", "))
    }
}

/// A schema document failed to compile.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("schema '{schema}' is invalid at {path}: {detail}")]
pub struct SchemaError {
    /// Name of the schema document.
    pub schema: String,
    /// Location inside the schema document.
    pub path: String,
    pub detail: String,
}

/// Every problem found by one load cycle.
///
/// `Display` renders the human-readable report printed at startup when the
/// first load fails, and logged when a reload is rejected.
#[derive(Debug, Default)]
pub struct LoadFailure {
    errors: Vec<ConfigError>,
}

impl LoadFailure {
    pub fn new(errors: Vec<ConfigError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ConfigError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Validation violations contained in this failure.
    pub fn violations(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.errors.iter().filter_map(|e| match e {
            ConfigError::Validation(v) => Some(v),
            _ => None,
        })
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        writeln!(
            f,
            "configuration is invalid: {count} problem{} found",
            if count == 1 { "" } else { "s" }
        )?;
        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f, "  {:>2}. {error}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadFailure {}
