//! Theme catalog and inheritance resolution.
//!
//! A theme document maps theme names to definitions:
//!
//! ```yaml
//! nord:
//!   extends: dark
//!   tags: [dark, truecolor]
//!   styles:
//!     message: { foreground: "#eceff4" }
//! universal: default   # alias, same as `{extends: default}`
//! ```
//!
//! Definitions are collected into a [`ThemeCatalog`] from the bundled
//! themes, the user's theme files and the config's `themes` section, in that
//! order. A name defined more than once is deep-merged, later over earlier.
//!
//! Resolving a name walks its `extends` chain, then merges root-first on top
//! of the bundled [`DEFAULT_THEME`] so every attribute it defines is filled
//! in. The result is validated against the theme schema.

use crate::document::{Document, Node, NodePath, Origin, Rank};
use crate::error::ConfigError;
use crate::merge::{MergedConfig, MergePolicies, merge_documents};
use crate::schema::{Schema, ValidationViolation};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Theme used when the config selects none. Has no `extends`.
pub const DEFAULT_THEME: &str = "default";

/// All known theme definitions.
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    /// Every definition of each name, in the order they were added.
    themes: BTreeMap<String, Vec<Document>>,
    schema: Schema,
    policies: MergePolicies,
}

impl ThemeCatalog {
    pub fn new(schema: &Schema) -> Self {
        Self {
            themes: BTreeMap::new(),
            policies: MergePolicies::from_schema(schema),
            schema: schema.clone(),
        }
    }

    /// Add every definition in a theme document.
    ///
    /// Each definition is checked against the theme schema on its own, with
    /// `required` keys relaxed since a child theme only lists what it
    /// changes. Problems are returned; definitions are added regardless.
    pub fn add_document(&mut self, document: &Document) -> Vec<ConfigError> {
        let origin = document.origin().clone();
        self.add_definitions(document.root(), &NodePath::root(), |_| origin.clone())
    }

    /// Add the inline definitions found under the merged config's `themes`
    /// key. These take precedence over every theme file.
    pub fn add_config_section(&mut self, merged: &MergedConfig) -> Vec<ConfigError> {
        let Some(section) = merged.get("themes") else {
            return Vec::new();
        };
        let prefix = NodePath::root().key("themes");
        self.add_definitions(section, &prefix, |path| {
            merged
                .origin_of(path)
                .cloned()
                .unwrap_or_else(|| Origin::new("<config>", Rank::default()))
        })
    }

    fn add_definitions(
        &mut self,
        section: &Node,
        prefix: &NodePath,
        origin_of: impl Fn(&NodePath) -> Origin,
    ) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let Some(definitions) = section.as_map() else {
            if !section.is_null() {
                errors.push(
                    ValidationViolation {
                        path: prefix.clone(),
                        rule: "type",
                        detail: format!("expected a mapping of theme names, found {}", section.kind()),
                        origin: Some(origin_of(prefix)),
                    }
                    .into(),
                );
            }
            return errors;
        };

        for (name, definition) in definitions {
            let path = prefix.key(name.as_str());
            let origin = origin_of(&path);
            let definition = match definition {
                Node::Null => continue,
                Node::String(parent) => {
                    let mut map = BTreeMap::new();
                    map.insert("extends".to_string(), Node::String(parent.clone()));
                    Node::Map(map)
                }
                Node::Map(_) => definition.clone(),
                other => {
                    errors.push(
                        ValidationViolation {
                            path,
                            rule: "type",
                            detail: format!(
                                "a theme must be a mapping or the name of another theme, found {}",
                                other.kind()
                            ),
                            origin: Some(origin),
                        }
                        .into(),
                    );
                    continue;
                }
            };
            for violation in self.schema.validate_partial(&definition) {
                errors.push(
                    violation
                        .prefixed(&path)
                        .with_origin(Some(origin.clone()))
                        .into(),
                );
            }
            log::trace!("Theme '{name}' defined by {}", origin.source);
            self.themes
                .entry(name.clone())
                .or_default()
                .push(Document::new(definition, origin));
        }
        errors
    }

    pub fn contains(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    /// Theme names in alphabetical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.themes.keys().map(String::as_str)
    }

    /// The `extends` parent of `name`, taking the latest definition that
    /// sets one, with that definition's origin.
    fn parent_of(&self, name: &str) -> Option<(String, Origin)> {
        self.themes.get(name)?.iter().rev().find_map(|doc| {
            doc.root()
                .get("extends")
                .and_then(Node::as_str)
                .map(|parent| (parent.to_string(), doc.origin().clone()))
        })
    }

    /// The derivation chain of `name`, child first.
    pub fn chain(&self, name: &str) -> Result<Vec<String>, ConfigError> {
        self.chain_from(name, None)
    }

    /// The derivation chain of `name`, which was selected in `selected_in`.
    /// An unknown `name` is reported against that origin.
    pub fn chain_from(
        &self,
        name: &str,
        selected_in: Option<&Origin>,
    ) -> Result<Vec<String>, ConfigError> {
        let mut chain: Vec<String> = Vec::new();
        let mut extends_in: Vec<Origin> = Vec::new();
        let mut current = name.to_string();
        let mut referenced_by = None;
        let mut origin = selected_in.cloned();
        loop {
            if let Some(start) = chain.iter().position(|n| *n == current) {
                let mut cycle = chain[start..].to_vec();
                cycle.push(current);
                return Err(ConfigError::ThemeCycle {
                    cycle,
                    origins: extends_in.split_off(start),
                });
            }
            if !self.contains(&current) {
                return Err(ConfigError::UnknownTheme {
                    name: current,
                    referenced_by,
                    origin,
                });
            }
            let parent = self.parent_of(&current);
            chain.push(current.clone());
            match parent {
                Some((parent, defined_in)) => {
                    referenced_by = Some(current);
                    extends_in.push(defined_in.clone());
                    origin = Some(defined_in);
                    current = parent;
                }
                None => return Ok(chain),
            }
        }
    }

    /// Resolve `name` into a fully expanded theme.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTheme, Vec<ConfigError>> {
        self.resolve_from(name, None)
    }

    /// Resolve `name`, which was selected in `selected_in`.
    pub fn resolve_from(
        &self,
        name: &str,
        selected_in: Option<&Origin>,
    ) -> Result<ResolvedTheme, Vec<ConfigError>> {
        let chain = self.chain_from(name, selected_in).map_err(|e| vec![e])?;

        let base = self.themes.get(DEFAULT_THEME).into_iter().flatten();
        let layers = chain
            .iter()
            .rev()
            .filter_map(|n| self.themes.get(n))
            .flatten();
        let merged = merge_documents(base.chain(layers), &self.policies)?;

        let violations: Vec<ConfigError> = {
            let mut tree = merged.root().clone();
            strip_references(&mut tree);
            let prefix = NodePath::root().key("themes").key(name);
            self.schema
                .validate(&tree)
                .into_iter()
                .map(|v| {
                    let origin = merged.origin_of(&v.path).cloned();
                    v.prefixed(&prefix).with_origin(origin).into()
                })
                .collect()
        };
        if !violations.is_empty() {
            return Err(violations);
        }

        let mut tree = merged.into_root();
        strip_references(&mut tree);
        log::debug!("Resolved theme '{name}' via {}", chain.join(" -> "));
        Ok(ResolvedTheme {
            name: name.to_string(),
            chain,
            attributes: tree.flatten(),
            tree,
        })
    }

    /// Resolve every theme in the catalog, collecting all problems.
    ///
    /// A cycle is reported once, not once per member, and themes that only
    /// inherit a broken reference are not reported again.
    pub fn resolve_all(&self) -> Result<BTreeMap<String, ResolvedTheme>, Vec<ConfigError>> {
        let mut resolved = BTreeMap::new();
        let mut errors = Vec::new();
        let mut reported: BTreeSet<String> = BTreeSet::new();

        for name in self.themes.keys() {
            match self.chain(name) {
                Err(ConfigError::ThemeCycle { cycle, origins }) => {
                    let mut members: Vec<&String> = cycle.iter().collect();
                    members.sort();
                    members.dedup();
                    let key = format!("cycle:{members:?}");
                    if cycle.contains(name) && reported.insert(key) {
                        errors.push(ConfigError::ThemeCycle { cycle, origins });
                    }
                }
                Err(err) => {
                    if reported.insert(err.to_string()) {
                        errors.push(err);
                    }
                }
                Ok(_) => match self.resolve(name) {
                    Ok(theme) => {
                        resolved.insert(name.clone(), theme);
                    }
                    Err(errs) => errors.extend(errs),
                },
            }
        }

        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(errors)
        }
    }
}

fn strip_references(tree: &mut Node) {
    if let Node::Map(map) = tree {
        map.remove("extends");
    }
}

/// A theme with its inheritance flattened away.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTheme {
    name: String,
    chain: Vec<String>,
    attributes: BTreeMap<String, Node>,
    tree: Node,
}

impl ResolvedTheme {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derivation chain, the theme itself first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Every attribute keyed by dotted path (`styles.message.foreground`).
    pub fn attributes(&self) -> &BTreeMap<String, Node> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Node> {
        self.attributes.get(key)
    }

    /// The resolved definition as a tree.
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn tags(&self) -> Vec<&str> {
        self.tree
            .get("tags")
            .and_then(Node::as_seq)
            .map(|tags| tags.iter().filter_map(Node::as_str).collect())
            .unwrap_or_default()
    }

    /// Style of a display element (`message`, `level`, `key`, ...).
    pub fn style(&self, element: &str) -> Option<Style> {
        let node = self.tree.get("styles")?.get(element)?;
        match node.to_typed::<Style>() {
            Ok(style) => Some(style),
            Err(e) => {
                log::debug!("Theme '{}' style '{element}' is unusable: {e}", self.name);
                None
            }
        }
    }

    /// Style of an element on a line of the given level: the element's
    /// style with the level-specific override laid over it.
    pub fn level_style(&self, level: &str, element: &str) -> Option<Style> {
        let base = self.style(element);
        let specific = self
            .tree
            .get("levels")
            .and_then(|levels| levels.get(level))
            .and_then(|styles| styles.get(element))
            .and_then(|node| node.to_typed::<Style>().ok());
        match (base, specific) {
            (Some(base), Some(specific)) => Some(base.overlay(specific)),
            (base, specific) => specific.or(base),
        }
    }
}

/// Text attributes of a style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StyleMode {
    Bold,
    Faint,
    Italic,
    Underline,
    SlowBlink,
    RapidBlink,
    Reverse,
    Conceal,
    CrossedOut,
}

/// Presentation of one display element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Style {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Color>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<StyleMode>,
}

impl Style {
    /// `other` over `self`: set colors win, non-empty modes replace.
    pub fn overlay(self, other: Style) -> Style {
        Style {
            foreground: other.foreground.or(self.foreground),
            background: other.background.or(self.background),
            modes: if other.modes.is_empty() {
                self.modes
            } else {
                other.modes
            },
        }
    }
}

const ANSI_NAMES: [&str; 16] = [
    "black",
    "red",
    "green",
    "yellow",
    "blue",
    "magenta",
    "cyan",
    "white",
    "bright-black",
    "bright-red",
    "bright-green",
    "bright-yellow",
    "bright-blue",
    "bright-magenta",
    "bright-cyan",
    "bright-white",
];

/// A terminal color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    /// The terminal's own foreground or background.
    Default,
    /// 256-color palette entry; 0-15 are the ANSI colors.
    Palette(u8),
    Rgb { r: u8, g: u8, b: u8 },
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color::Rgb { r, g, b }
    }

    /// ANSI color by name (`red`, `bright-blue`).
    pub fn named(name: &str) -> Option<Self> {
        ANSI_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|index| Color::Palette(index as u8))
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "default" {
            return Ok(Color::Default);
        }
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(format!("invalid hex color '{s}', expected #rrggbb"));
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
            return match (channel(0), channel(2), channel(4)) {
                (Ok(r), Ok(g), Ok(b)) => Ok(Color::rgb(r, g, b)),
                _ => Err(format!("invalid hex color '{s}'")),
            };
        }
        if let Ok(index) = s.parse::<u8>() {
            return Ok(Color::Palette(index));
        }
        Color::named(s).ok_or_else(|| format!("unknown color '{s}'"))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Default => f.write_str("default"),
            Color::Palette(index) => match ANSI_NAMES.get(usize::from(*index)) {
                Some(name) => f.write_str(name),
                None => write!(f, "{index}"),
            },
            Color::Rgb { r, g, b } => write!(f, "#{r:02x}{g:02x}{b:02x}"),
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Color::Palette(index) if usize::from(*index) >= ANSI_NAMES.len() => {
                serializer.serialize_u8(*index)
            }
            other => serializer.collect_str(other),
        }
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u8),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => Ok(Color::Palette(index)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}
