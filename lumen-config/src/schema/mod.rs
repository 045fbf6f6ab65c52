//! Schema compilation and validation.
//!
//! Schemas are YAML documents written in a subset of JSON Schema:
//!
//! - `type` (a name or a list of names), `enum`, `pattern`, `minimum`,
//!   `maximum`, `minItems`, `maxItems`
//! - `properties`, `required`, `additionalProperties`, `items`
//! - `$ref` to `#/$defs/<name>` (or `#/definitions/<name>`)
//! - `x-merge` / `x-merge-key`: the merge strategy for the annotated path
//!
//! One deliberate difference from JSON Schema: `additionalProperties`
//! defaults to `false`. Every key that can appear in a merged config is
//! therefore covered by a rule unless a subtree is explicitly marked
//! schema-free with `additionalProperties: true`.

mod validate;

pub use validate::ValidationViolation;

use crate::document::{Node, NodePath};
use crate::error::SchemaError;
use crate::merge::MergeStrategy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// JSON Schema type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl TypeName {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "object" => TypeName::Object,
            "array" => TypeName::Array,
            "string" => TypeName::String,
            "integer" => TypeName::Integer,
            "number" => TypeName::Number,
            "boolean" => TypeName::Boolean,
            "null" => TypeName::Null,
            _ => return None,
        })
    }

    /// Whether `node` is an instance of this type. A float never satisfies
    /// `integer`, even when whole (`100.0`), since integer settings convert to
    /// integer types; strings never satisfy a numeric type.
    pub fn accepts(&self, node: &Node) -> bool {
        match (self, node) {
            (TypeName::Object, Node::Map(_)) => true,
            (TypeName::Array, Node::Seq(_)) => true,
            (TypeName::String, Node::String(_)) => true,
            (TypeName::Integer, Node::Int(_)) => true,
            (TypeName::Number, Node::Int(_) | Node::Float(_)) => true,
            (TypeName::Boolean, Node::Bool(_)) => true,
            (TypeName::Null, Node::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeName::Object => "object",
            TypeName::Array => "array",
            TypeName::String => "string",
            TypeName::Integer => "integer",
            TypeName::Number => "number",
            TypeName::Boolean => "boolean",
            TypeName::Null => "null",
        };
        f.write_str(name)
    }
}

/// What to do with mapping keys not listed in `properties`.
#[derive(Debug, Clone)]
pub enum Additional {
    /// Unknown keys are violations.
    Forbid,
    /// Schema-free subtree.
    Any,
    /// Unknown keys must match this rule.
    Rule(Box<SchemaRule>),
}

/// A compiled constraint for one position in the document tree.
#[derive(Debug, Clone)]
pub struct SchemaRule {
    /// Accepted types; empty accepts anything.
    pub types: Vec<TypeName>,
    pub properties: BTreeMap<String, SchemaRule>,
    pub required: Vec<String>,
    pub additional: Additional,
    pub items: Option<Box<SchemaRule>>,
    pub enum_values: Option<Vec<Node>>,
    pub pattern: Option<Regex>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub merge: Option<MergeStrategy>,
    pub description: Option<String>,
}

impl Default for SchemaRule {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional: Additional::Forbid,
            items: None,
            enum_values: None,
            pattern: None,
            minimum: None,
            maximum: None,
            min_items: None,
            max_items: None,
            merge: None,
            description: None,
        }
    }
}

const KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$defs",
    "definitions",
    "$ref",
    "title",
    "description",
    "default",
    "examples",
    "type",
    "properties",
    "required",
    "additionalProperties",
    "items",
    "enum",
    "pattern",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
    "x-merge",
    "x-merge-key",
];

/// A compiled schema document.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    root: SchemaRule,
}

impl Schema {
    /// Compile a parsed schema document.
    pub fn compile(name: impl Into<String>, document: &Node) -> Result<Self, SchemaError> {
        let name = name.into();
        let empty = BTreeMap::new();
        let defs = document
            .get("$defs")
            .or_else(|| document.get("definitions"))
            .and_then(Node::as_map)
            .unwrap_or(&empty);
        let mut compiler = Compiler {
            schema: &name,
            defs,
            ref_stack: Vec::new(),
        };
        let root = compiler.compile(document, &NodePath::root())?;
        Ok(Self { name, root })
    }

    /// Parse and compile a YAML schema document.
    pub fn from_yaml_str(name: impl Into<String>, text: &str) -> Result<Self, SchemaError> {
        let name = name.into();
        let value: serde_yaml_ng::Value =
            serde_yaml_ng::from_str(text).map_err(|e| SchemaError {
                schema: name.clone(),
                path: NodePath::root().to_string(),
                detail: e.to_string(),
            })?;
        Self::compile(name, &Node::from_yaml(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &SchemaRule {
        &self.root
    }

    /// Validate a complete tree. Every violation is reported.
    pub fn validate(&self, node: &Node) -> Vec<ValidationViolation> {
        validate::validate(&self.root, node, false)
    }

    /// Validate a possibly partial tree (a single override layer): same as
    /// [`Schema::validate`] but `required` keys may be missing.
    pub fn validate_partial(&self, node: &Node) -> Vec<ValidationViolation> {
        validate::validate(&self.root, node, true)
    }

    /// `x-merge` annotations as (schema path, strategy) pairs.
    ///
    /// Only paths reachable through `properties` and `items` are listed;
    /// annotations under `additionalProperties` rules have no fixed path.
    pub fn merge_annotations(&self) -> Vec<(String, MergeStrategy)> {
        let mut out = Vec::new();
        collect_annotations(&self.root, &NodePath::root(), &mut out);
        out
    }
}

fn collect_annotations(rule: &SchemaRule, path: &NodePath, out: &mut Vec<(String, MergeStrategy)>) {
    if let Some(strategy) = &rule.merge {
        out.push((path.schema_path(), strategy.clone()));
    }
    for (key, child) in &rule.properties {
        collect_annotations(child, &path.key(key.as_str()), out);
    }
    if let Some(items) = &rule.items {
        collect_annotations(items, &path.index(0), out);
    }
}

struct Compiler<'a> {
    schema: &'a str,
    defs: &'a BTreeMap<String, Node>,
    ref_stack: Vec<String>,
}

impl Compiler<'_> {
    fn error(&self, path: &NodePath, detail: impl Into<String>) -> SchemaError {
        SchemaError {
            schema: self.schema.to_string(),
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    fn compile(&mut self, node: &Node, path: &NodePath) -> Result<SchemaRule, SchemaError> {
        let map = match node {
            Node::Map(map) => map,
            Node::Bool(true) => {
                return Ok(SchemaRule {
                    additional: Additional::Any,
                    ..SchemaRule::default()
                });
            }
            other => {
                return Err(self.error(path, format!("expected a schema mapping, found {}", other.kind())));
            }
        };

        for key in map.keys() {
            if !KEYWORDS.contains(&key.as_str()) {
                return Err(self.error(path, format!("unsupported keyword '{key}'")));
            }
        }

        if let Some(reference) = map.get("$ref") {
            return self.compile_ref(reference, map, path);
        }

        let mut rule = SchemaRule {
            description: map.get("description").and_then(Node::as_str).map(str::to_string),
            ..SchemaRule::default()
        };

        if let Some(types) = map.get("type") {
            rule.types = self.compile_types(types, &path.key("type"))?;
        }

        if let Some(properties) = map.get("properties") {
            let properties_path = path.key("properties");
            let Some(properties) = properties.as_map() else {
                return Err(self.error(&properties_path, "`properties` must be a mapping"));
            };
            for (key, child) in properties {
                let compiled = self.compile(child, &properties_path.key(key.as_str()))?;
                rule.properties.insert(key.clone(), compiled);
            }
        }

        if let Some(required) = map.get("required") {
            let required_path = path.key("required");
            let names = required
                .as_seq()
                .ok_or_else(|| self.error(&required_path, "`required` must be a list of names"))?;
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| self.error(&required_path, "`required` must be a list of names"))?;
                rule.required.push(name.to_string());
            }
        }

        rule.additional = match map.get("additionalProperties") {
            None | Some(Node::Bool(false)) => Additional::Forbid,
            Some(Node::Bool(true)) => Additional::Any,
            Some(child) => Additional::Rule(Box::new(
                self.compile(child, &path.key("additionalProperties"))?,
            )),
        };

        if let Some(items) = map.get("items") {
            rule.items = Some(Box::new(self.compile(items, &path.key("items"))?));
        }

        if let Some(values) = map.get("enum") {
            let values = values
                .as_seq()
                .ok_or_else(|| self.error(&path.key("enum"), "`enum` must be a list"))?;
            rule.enum_values = Some(values.to_vec());
        }

        if let Some(pattern) = map.get("pattern") {
            let pattern_path = path.key("pattern");
            let text = pattern
                .as_str()
                .ok_or_else(|| self.error(&pattern_path, "`pattern` must be a string"))?;
            rule.pattern = Some(
                Regex::new(text)
                    .map_err(|e| self.error(&pattern_path, format!("invalid regex: {e}")))?,
            );
        }

        rule.minimum = self.number(map, "minimum", path)?;
        rule.maximum = self.number(map, "maximum", path)?;
        rule.min_items = self.count(map, "minItems", path)?;
        rule.max_items = self.count(map, "maxItems", path)?;

        if let Some(strategy) = map.get("x-merge") {
            let merge_path = path.key("x-merge");
            let name = strategy
                .as_str()
                .ok_or_else(|| self.error(&merge_path, "`x-merge` must be a string"))?;
            let key = map.get("x-merge-key").and_then(Node::as_str);
            rule.merge = Some(
                MergeStrategy::from_annotation(name, key).map_err(|e| self.error(&merge_path, e))?,
            );
        } else if map.contains_key("x-merge-key") {
            return Err(self.error(path, "`x-merge-key` without `x-merge: merge-by-key`"));
        }

        Ok(rule)
    }

    fn compile_ref(
        &mut self,
        reference: &Node,
        map: &BTreeMap<String, Node>,
        path: &NodePath,
    ) -> Result<SchemaRule, SchemaError> {
        let ref_path = path.key("$ref");
        if map
            .keys()
            .any(|k| !matches!(k.as_str(), "$ref" | "description" | "title" | "$schema" | "$id" | "$defs" | "definitions"))
        {
            return Err(self.error(path, "`$ref` cannot be combined with other constraints"));
        }
        let target = reference
            .as_str()
            .ok_or_else(|| self.error(&ref_path, "`$ref` must be a string"))?;
        let name = target
            .strip_prefix("#/$defs/")
            .or_else(|| target.strip_prefix("#/definitions/"))
            .ok_or_else(|| {
                self.error(&ref_path, format!("only local `#/$defs/<name>` references are supported, got '{target}'"))
            })?;
        let defs = self.defs;
        let definition = defs
            .get(name)
            .ok_or_else(|| self.error(&ref_path, format!("undefined reference '{target}'")))?;
        if self.ref_stack.iter().any(|r| r == name) {
            return Err(self.error(&ref_path, format!("recursive reference '{target}'")));
        }
        self.ref_stack.push(name.to_string());
        let compiled = self.compile(definition, &NodePath::root().key("$defs").key(name));
        self.ref_stack.pop();
        compiled
    }

    fn compile_types(&self, node: &Node, path: &NodePath) -> Result<Vec<TypeName>, SchemaError> {
        let names: Vec<&Node> = match node {
            Node::Seq(items) => items.iter().collect(),
            single => vec![single],
        };
        names
            .into_iter()
            .map(|n| {
                n.as_str()
                    .and_then(TypeName::parse)
                    .ok_or_else(|| self.error(path, format!("unknown type {n:?}")))
            })
            .collect()
    }

    fn number(
        &self,
        map: &BTreeMap<String, Node>,
        key: &str,
        path: &NodePath,
    ) -> Result<Option<f64>, SchemaError> {
        match map.get(key) {
            None => Ok(None),
            Some(node) => node
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.error(&path.key(key), format!("`{key}` must be a number"))),
        }
    }

    fn count(
        &self,
        map: &BTreeMap<String, Node>,
        key: &str,
        path: &NodePath,
    ) -> Result<Option<usize>, SchemaError> {
        match map.get(key) {
            None => Ok(None),
            Some(node) => node
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    self.error(&path.key(key), format!("`{key}` must be a non-negative integer"))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> Result<Schema, SchemaError> {
        Schema::from_yaml_str("test", text)
    }

    #[test]
    fn test_compile_with_refs() {
        let schema = compile(
            r##"
type: object
properties:
  style:
    $ref: "#/$defs/style"
$defs:
  style:
    type: object
    properties:
      foreground: {type: string}
"##,
        )
        .expect("compiles");
        let style = &schema.root().properties["style"];
        assert!(style.properties.contains_key("foreground"));
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let err = compile("type: object\noneOf: []\n").unwrap_err();
        assert!(err.detail.contains("unsupported keyword 'oneOf'"));
    }

    #[test]
    fn test_recursive_ref_rejected() {
        let err = compile(
            r##"
$ref: "#/$defs/a"
$defs:
  a:
    $ref: "#/$defs/b"
  b:
    $ref: "#/$defs/a"
"##,
        )
        .unwrap_err();
        assert!(err.detail.contains("recursive reference"));
    }

    #[test]
    fn test_undefined_ref_rejected() {
        let err = compile("$ref: \"#/$defs/missing\"\n").unwrap_err();
        assert!(err.detail.contains("undefined reference"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = compile("type: string\npattern: \"([\"\n").unwrap_err();
        assert_eq!(err.path, "pattern");
    }

    #[test]
    fn test_merge_annotations() {
        let schema = compile(
            r#"
type: object
properties:
  hide:
    type: array
    x-merge: append
  levels:
    type: array
    x-merge: merge-by-key
    x-merge-key: level
    items:
      type: object
      properties:
        names: {type: array, x-merge: append}
"#,
        )
        .expect("compiles");
        let annotations = schema.merge_annotations();
        assert!(annotations.contains(&("hide".to_string(), MergeStrategy::Append)));
        assert!(annotations.contains(&(
            "levels".to_string(),
            MergeStrategy::MergeByKey("level".into())
        )));
        assert!(annotations.contains(&("levels[].names".to_string(), MergeStrategy::Append)));
    }

    #[test]
    fn test_merge_by_key_requires_key() {
        let err = compile("type: array\nx-merge: merge-by-key\n").unwrap_err();
        assert!(err.detail.contains("x-merge-key"));
    }

    #[test]
    fn test_type_accepts() {
        assert!(TypeName::Integer.accepts(&Node::Int(8)));
        assert!(!TypeName::Integer.accepts(&Node::Float(8.0)));
        assert!(!TypeName::Integer.accepts(&Node::Float(8.5)));
        assert!(!TypeName::Integer.accepts(&Node::String("8".into())));
        assert!(TypeName::Number.accepts(&Node::Int(8)));
    }
}
