//! Document loading.
//!
//! Turns an ordered list of [`SourceDescriptor`]s into [`Document`]s, one
//! per source that exists, each tagged with its precedence rank. Ranks are
//! handed out in the order documents are produced, so they are strictly
//! increasing and an absent optional source simply leaves no layer.
//!
//! Loading keeps going after a broken source so that every read, encoding
//! and parse problem is reported together.

use crate::document::{Document, Node, Origin, Rank};
use crate::env_vars::Environment;
use crate::error::{ConfigError, Location};
use globset::Glob;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable suffixes (after the overlay prefix) that control
/// lumen itself and are never treated as config keys.
pub const RESERVED_ENV_SUFFIXES: &[&str] = &["CONFIG_DIR", "LOG"];

/// One configuration or theme source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    /// A document bundled into the binary, addressed by a fixed logical name.
    Embedded {
        name: String,
        contents: Cow<'static, str>,
    },
    /// A single file. Absent optional files are skipped.
    File { path: PathBuf, required: bool },
    /// Every file in `dir` whose file name matches `pattern`, in file-name
    /// order. A missing directory contributes nothing.
    Glob { dir: PathBuf, pattern: String },
    /// `PREFIX_A__B_C=value` variables as the document `{a: {b-c: value}}`.
    EnvOverlay { prefix: String },
}

impl SourceDescriptor {
    pub fn embedded(name: impl Into<String>, contents: &'static str) -> Self {
        SourceDescriptor::Embedded {
            name: name.into(),
            contents: Cow::Borrowed(contents),
        }
    }

    pub fn optional_file(path: impl Into<PathBuf>) -> Self {
        SourceDescriptor::File {
            path: path.into(),
            required: false,
        }
    }

    pub fn required_file(path: impl Into<PathBuf>) -> Self {
        SourceDescriptor::File {
            path: path.into(),
            required: true,
        }
    }

    pub fn glob(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        SourceDescriptor::Glob {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    pub fn env_overlay(prefix: impl Into<String>) -> Self {
        SourceDescriptor::EnvOverlay {
            prefix: prefix.into(),
        }
    }
}

/// Syntax of a source, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Yaml,
    Toml,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => SourceFormat::Toml,
            _ => SourceFormat::Yaml,
        }
    }
}

/// Result of loading a list of sources: every document that loaded plus
/// every error encountered.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub errors: Vec<ConfigError>,
}

/// Loads source descriptors into documents.
#[derive(Debug, Clone)]
pub struct DocumentLoader<'a> {
    environment: &'a Environment,
    next_rank: u32,
}

impl<'a> DocumentLoader<'a> {
    pub fn new(environment: &'a Environment) -> Self {
        Self {
            environment,
            next_rank: 0,
        }
    }

    /// Load all `sources` in order.
    pub fn load_all(mut self, sources: &[SourceDescriptor]) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();
        for source in sources {
            self.load_into(source, &mut outcome);
        }
        outcome
    }

    fn load_into(&mut self, source: &SourceDescriptor, outcome: &mut LoadOutcome) {
        match source {
            SourceDescriptor::Embedded { name, contents } => {
                match parse_text(contents, SourceFormat::Yaml, name) {
                    Ok(root) => outcome.documents.push(self.document(root, name.clone())),
                    Err(e) => outcome.errors.push(e),
                }
            }
            SourceDescriptor::File { path, required } => {
                match self.load_file(path, *required) {
                    Ok(Some(doc)) => outcome.documents.push(doc),
                    Ok(None) => log::debug!("Optional config source {:?} not present", path),
                    Err(e) => outcome.errors.push(e),
                }
            }
            SourceDescriptor::Glob { dir, pattern } => match expand_glob(dir, pattern) {
                Ok(paths) => {
                    for path in paths {
                        match self.load_file(&path, true) {
                            Ok(Some(doc)) => outcome.documents.push(doc),
                            Ok(None) => {}
                            Err(e) => outcome.errors.push(e),
                        }
                    }
                }
                Err(e) => outcome.errors.push(e),
            },
            SourceDescriptor::EnvOverlay { prefix } => {
                match overlay_from_env(self.environment, prefix) {
                    Some(root) => outcome
                        .documents
                        .push(self.document(root, format!("env:{prefix}*"))),
                    None => log::debug!("No {prefix}* environment overrides set"),
                }
            }
        }
    }

    fn load_file(&mut self, path: &Path, required: bool) -> Result<Option<Document>, ConfigError> {
        let Some(text) = read_source(path, required)? else {
            return Ok(None);
        };
        let origin = path.display().to_string();
        let text = self.environment.substitute(&text);
        let root = parse_text(&text, SourceFormat::from_path(path), &origin)?;
        log::debug!("Loaded config source {}", origin);
        Ok(Some(self.document(root, origin)))
    }

    fn document(&mut self, root: Node, source: String) -> Document {
        let rank = Rank(self.next_rank);
        self.next_rank += 1;
        Document::new(root, Origin::new(source, rank))
    }
}

/// Read a source file as UTF-8 text.
///
/// Returns `Ok(None)` for a missing optional file.
pub fn read_source(path: &Path, required: bool) -> Result<Option<String>, ConfigError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound && !required => return Ok(None),
        Err(source) => {
            return Err(ConfigError::SourceRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    String::from_utf8(bytes).map(Some).map_err(|e| ConfigError::Encoding {
        origin: path.display().to_string(),
        detail: format!(
            "not valid UTF-8 (first invalid byte at offset {})",
            e.utf8_error().valid_up_to()
        ),
    })
}

/// Parse source text into a document root. The root must be a mapping; an
/// empty document is an empty mapping.
pub fn parse_text(text: &str, format: SourceFormat, origin: &str) -> Result<Node, ConfigError> {
    let root = match format {
        SourceFormat::Yaml => {
            let value: serde_yaml_ng::Value =
                serde_yaml_ng::from_str(text).map_err(|e| ConfigError::Parse {
                    origin: origin.to_string(),
                    location: e.location().map(|l| Location {
                        line: l.line(),
                        column: l.column(),
                    }),
                    message: e.to_string(),
                })?;
            Node::from_yaml(value)
        }
        SourceFormat::Toml => {
            let table: toml::Table = toml::from_str(text).map_err(|e| ConfigError::Parse {
                origin: origin.to_string(),
                location: e.span().map(|span| location_of_offset(text, span.start)),
                message: e.message().to_string(),
            })?;
            Node::from_toml(toml::Value::Table(table))
        }
    };
    match root {
        Node::Null => Ok(Node::empty_map()),
        Node::Map(_) => Ok(root),
        other => Err(ConfigError::Parse {
            origin: origin.to_string(),
            location: None,
            message: format!("top-level value must be a mapping, found {}", other.kind()),
        }),
    }
}

fn location_of_offset(text: &str, offset: usize) -> Location {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    Location { line, column }
}

/// Files directly inside `dir` whose name matches `pattern`, sorted by file
/// name. A missing directory yields no files.
pub fn expand_glob(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let matcher = Glob::new(pattern)
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?
        .compile_matcher();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::SourceRead {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().is_some_and(|name| matcher.is_match(name)))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Build the overlay document from `PREFIX_*` variables, or `None` when no
/// variable applies.
///
/// `__` separates nesting levels; within a level `_` becomes `-` and names
/// are lower-cased, so `LUMEN_WATCH__DEBOUNCE_MS=500` sets
/// `watch.debounce-ms`. A value that is a single boolean or number token
/// (`500`, `2.5`, `true`) is typed; every other value is kept verbatim as a
/// string.
pub fn overlay_from_env(environment: &Environment, prefix: &str) -> Option<Node> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (name, raw) in environment.with_prefix(prefix) {
        let rest = &name[prefix.len()..];
        if rest.is_empty() || RESERVED_ENV_SUFFIXES.contains(&rest) {
            continue;
        }
        let keys: Vec<String> = rest
            .split("__")
            .map(|part| part.to_ascii_lowercase().replace('_', "-"))
            .collect();
        if keys.iter().any(String::is_empty) {
            log::warn!("Ignoring malformed override variable {name}");
            continue;
        }
        if !insert_at(&mut root, &keys, env_scalar(raw)) {
            log::warn!("Ignoring override variable {name}: it conflicts with another override");
        }
    }
    if root.is_empty() {
        None
    } else {
        Some(Node::Map(root))
    }
}

/// Coerce a plain boolean or number; every other value stays the raw
/// string. Only single tokens are parsed, so YAML indicators (`|`, `>`,
/// `- `), comments and flow collections never change the value.
fn env_scalar(raw: &str) -> Node {
    let token = raw.trim();
    if token.is_empty() || token.contains(|c: char| c.is_whitespace() || c == '#') {
        return Node::String(raw.to_string());
    }
    match serde_yaml_ng::from_str::<serde_yaml_ng::Value>(token) {
        Ok(value @ (serde_yaml_ng::Value::Bool(_) | serde_yaml_ng::Value::Number(_))) => {
            Node::from_yaml(value)
        }
        _ => Node::String(raw.to_string()),
    }
}

fn insert_at(map: &mut BTreeMap<String, Node>, keys: &[String], value: Node) -> bool {
    let Some((first, rest)) = keys.split_first() else {
        return false;
    };
    if rest.is_empty() {
        if map.get(first).is_some_and(Node::is_container) {
            return false;
        }
        map.insert(first.clone(), value);
        return true;
    }
    let child = map.entry(first.clone()).or_insert_with(Node::empty_map);
    match child {
        Node::Map(inner) => insert_at(inner, rest, value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_optional_file_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let env = Environment::empty();
        let outcome = DocumentLoader::new(&env).load_all(&[
            SourceDescriptor::embedded("<defaults>", "a: 1\n"),
            SourceDescriptor::optional_file(temp_dir.path().join("config.yaml")),
        ]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.documents.len(), 1);
    }

    #[test]
    fn test_missing_required_file_is_source_read_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let env = Environment::empty();
        let outcome = DocumentLoader::new(&env)
            .load_all(&[SourceDescriptor::required_file(temp_dir.path().join("nope.yaml"))]);
        assert!(matches!(
            outcome.errors.as_slice(),
            [ConfigError::SourceRead { .. }]
        ));
    }

    #[test]
    fn test_ranks_are_strictly_increasing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("b.yaml"), "b: 1\n").expect("write");
        fs::write(temp_dir.path().join("a.yaml"), "a: 1\n").expect("write");
        fs::write(temp_dir.path().join("notes.txt"), "ignored").expect("write");
        let env = Environment::from_pairs([("LUMEN_THEME", "nord")]);
        let outcome = DocumentLoader::new(&env).load_all(&[
            SourceDescriptor::embedded("<defaults>", "x: 0\n"),
            SourceDescriptor::glob(temp_dir.path(), "*.yaml"),
            SourceDescriptor::env_overlay("LUMEN_"),
        ]);
        assert!(outcome.errors.is_empty());
        let ranks: Vec<u32> = outcome.documents.iter().map(|d| d.rank().0).collect();
        assert_eq!(ranks, [0, 1, 2, 3]);
        assert!(outcome.documents[1].origin().source.ends_with("a.yaml"));
        assert!(outcome.documents[2].origin().source.ends_with("b.yaml"));
        assert_eq!(outcome.documents[3].origin().source, "env:LUMEN_*");
    }

    #[test]
    fn test_every_broken_source_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("01-bad.yaml"), "a: [1, 2\n").expect("write");
        fs::write(temp_dir.path().join("02-bin.yaml"), [0x61, 0x3a, 0x20, 0xff, 0xfe]).expect("write");
        fs::write(temp_dir.path().join("03-list.yaml"), "- 1\n- 2\n").expect("write");
        let env = Environment::empty();
        let outcome =
            DocumentLoader::new(&env).load_all(&[SourceDescriptor::glob(temp_dir.path(), "*.yaml")]);
        assert_eq!(outcome.errors.len(), 3);
        assert!(matches!(outcome.errors[0], ConfigError::Parse { .. }));
        assert!(matches!(outcome.errors[1], ConfigError::Encoding { .. }));
        assert!(matches!(outcome.errors[2], ConfigError::Parse { .. }));
    }

    #[test]
    fn test_yaml_parse_error_has_location() {
        let err = parse_text("a: 1\nb: [1, 2\n", SourceFormat::Yaml, "x.yaml").unwrap_err();
        match err {
            ConfigError::Parse { location, .. } => assert!(location.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_toml_source() {
        let root = parse_text(
            "theme = \"nord\"\n[watch]\ndebounce-ms = 100\n",
            SourceFormat::Toml,
            "config.toml",
        )
        .expect("valid toml");
        assert_eq!(root.lookup_dotted("watch.debounce-ms"), Some(&Node::Int(100)));
    }

    #[test]
    fn test_toml_parse_error_location() {
        let err = parse_text("a = 1\nb = \n", SourceFormat::Toml, "c.toml").unwrap_err();
        match err {
            ConfigError::Parse { location, .. } => {
                assert_eq!(location.map(|l| l.line), Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_document_is_empty_map() {
        assert_eq!(
            parse_text("", SourceFormat::Yaml, "empty.yaml").expect("ok"),
            Node::empty_map()
        );
    }

    #[test]
    fn test_env_overlay_nesting_and_scalars() {
        let env = Environment::from_pairs([
            ("LUMEN_THEME", "nord"),
            ("LUMEN_WATCH__DEBOUNCE_MS", "500"),
            ("LUMEN_WATCH__ENABLED", "false"),
            ("LUMEN_CONFIG_DIR", "/tmp/elsewhere"),
            ("LUMEN_LOG", "debug"),
            ("LUMEN_TIME_FORMAT", "%H:%M"),
        ]);
        let overlay = overlay_from_env(&env, "LUMEN_").expect("overlay");
        assert_eq!(overlay.get("theme"), Some(&Node::String("nord".into())));
        assert_eq!(overlay.lookup_dotted("watch.debounce-ms"), Some(&Node::Int(500)));
        assert_eq!(overlay.lookup_dotted("watch.enabled"), Some(&Node::Bool(false)));
        assert_eq!(overlay.get("time-format"), Some(&Node::String("%H:%M".into())));
        assert!(overlay.get("config-dir").is_none());
        assert!(overlay.get("log").is_none());
    }

    #[test]
    fn test_env_values_keep_yaml_syntax_literal() {
        let env = Environment::from_pairs([
            ("LUMEN_A", "|"),
            ("LUMEN_B", "> "),
            ("LUMEN_C", "- x"),
            ("LUMEN_D", "Europe/Paris #x"),
            ("LUMEN_E", "[1, 2]"),
            ("LUMEN_F", "{a: 1}"),
            ("LUMEN_G", "~"),
            ("LUMEN_H", "2.5"),
        ]);
        let overlay = overlay_from_env(&env, "LUMEN_").expect("overlay");
        let text = |key: &str| overlay.get(key).and_then(Node::as_str).map(str::to_string);
        assert_eq!(text("a").as_deref(), Some("|"));
        assert_eq!(text("b").as_deref(), Some("> "));
        assert_eq!(text("c").as_deref(), Some("- x"));
        assert_eq!(text("d").as_deref(), Some("Europe/Paris #x"));
        assert_eq!(text("e").as_deref(), Some("[1, 2]"));
        assert_eq!(text("f").as_deref(), Some("{a: 1}"));
        assert_eq!(text("g").as_deref(), Some("~"));
        assert_eq!(overlay.get("h"), Some(&Node::Float(2.5)));
    }

    #[test]
    fn test_env_overlay_absent_when_no_variables() {
        let env = Environment::from_pairs([("HOME", "/home/x")]);
        assert!(overlay_from_env(&env, "LUMEN_").is_none());
    }

    #[test]
    fn test_substitution_applies_to_user_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "time-zone: ${TZ:-UTC}\n").expect("write");
        let env = Environment::from_pairs([("TZ", "Europe/Paris")]);
        let outcome = DocumentLoader::new(&env).load_all(&[SourceDescriptor::required_file(&path)]);
        assert_eq!(
            outcome.documents[0].root().get("time-zone"),
            Some(&Node::String("Europe/Paris".into()))
        );
    }

    #[test]
    fn test_invalid_glob_pattern() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        assert!(matches!(
            expand_glob(temp_dir.path(), "[unclosed"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
