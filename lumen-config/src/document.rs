//! Schema-agnostic document tree shared by every stage of the load cycle.
//!
//! Sources are parsed into [`Node`] trees before anything knows what shape
//! they should have. Mappings are key-ordered (`BTreeMap`) so merging and
//! serialising a tree never depends on the order keys appeared in a file.
//! Conversion into strongly-typed records happens only after validation,
//! through [`Node::to_typed`].

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// An untyped configuration value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

/// The variant of a [`Node`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Seq,
    Map,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Null => "null",
            NodeKind::Bool => "boolean",
            NodeKind::Int => "integer",
            NodeKind::Float => "number",
            NodeKind::String => "string",
            NodeKind::Seq => "sequence",
            NodeKind::Map => "mapping",
        };
        f.write_str(name)
    }
}

impl Node {
    /// An empty mapping.
    pub fn empty_map() -> Self {
        Node::Map(BTreeMap::new())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Null => NodeKind::Null,
            Node::Bool(_) => NodeKind::Bool,
            Node::Int(_) => NodeKind::Int,
            Node::Float(_) => NodeKind::Float,
            Node::String(_) => NodeKind::String,
            Node::Seq(_) => NodeKind::Seq,
            Node::Map(_) => NodeKind::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// True for sequences and mappings.
    pub fn is_container(&self) -> bool {
        matches!(self, Node::Seq(_) | Node::Map(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or float node.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Int(i) => Some(*i as f64),
            Node::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Node]> {
        match self {
            Node::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Child of a mapping by key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Walk `path` from this node.
    pub fn lookup(&self, path: &NodePath) -> Option<&Node> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(key), Node::Map(map)) => map.get(key)?,
                (PathSegment::Index(index), Node::Seq(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Walk a dotted path such as `fields.predefined.level.variants[0]`.
    pub fn lookup_dotted(&self, dotted: &str) -> Option<&Node> {
        self.lookup(&NodePath::parse(dotted))
    }

    /// Copy of this node with every null-valued mapping entry removed.
    ///
    /// Sequence elements are kept as they are (a null element is a value),
    /// but mappings nested inside them are cleaned too.
    pub fn without_nulls(&self) -> Node {
        match self {
            Node::Map(map) => Node::Map(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.without_nulls()))
                    .collect(),
            ),
            Node::Seq(items) => Node::Seq(items.iter().map(Node::without_nulls).collect()),
            other => other.clone(),
        }
    }

    /// Flatten into dotted keys. Scalars and sequences are leaves; empty
    /// mappings produce no entries.
    pub fn flatten(&self) -> BTreeMap<String, Node> {
        let mut out = BTreeMap::new();
        flatten_into(self, String::new(), &mut out);
        out
    }

    /// Text form of a scalar, used for identity matching and mapping keys.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Node::Null => Some("null".to_string()),
            Node::Bool(b) => Some(b.to_string()),
            Node::Int(i) => Some(i.to_string()),
            Node::Float(f) => Some(f.to_string()),
            Node::String(s) => Some(s.clone()),
            Node::Seq(_) | Node::Map(_) => None,
        }
    }

    pub fn from_yaml(value: serde_yaml_ng::Value) -> Node {
        use serde_yaml_ng::Value;
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Node::Int(i)
                } else {
                    // u64 above i64::MAX, or a float
                    Node::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Node::String(s),
            Value::Sequence(items) => Node::Seq(items.into_iter().map(Node::from_yaml).collect()),
            Value::Mapping(mapping) => Node::Map(
                mapping
                    .into_iter()
                    .map(|(k, v)| (yaml_key_text(k), Node::from_yaml(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Node::from_yaml(tagged.value),
        }
    }

    pub fn to_yaml(&self) -> serde_yaml_ng::Value {
        use serde_yaml_ng::{Mapping, Number, Value};
        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::Number(Number::from(*i)),
            Node::Float(f) => Value::Number(Number::from(*f)),
            Node::String(s) => Value::String(s.clone()),
            Node::Seq(items) => Value::Sequence(items.iter().map(Node::to_yaml).collect()),
            Node::Map(map) => {
                let mut mapping = Mapping::new();
                for (k, v) in map {
                    mapping.insert(Value::String(k.clone()), v.to_yaml());
                }
                Value::Mapping(mapping)
            }
        }
    }

    pub fn from_toml(value: toml::Value) -> Node {
        match value {
            toml::Value::String(s) => Node::String(s),
            toml::Value::Integer(i) => Node::Int(i),
            toml::Value::Float(f) => Node::Float(f),
            toml::Value::Boolean(b) => Node::Bool(b),
            toml::Value::Datetime(dt) => Node::String(dt.to_string()),
            toml::Value::Array(items) => Node::Seq(items.into_iter().map(Node::from_toml).collect()),
            toml::Value::Table(table) => Node::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Node::from_toml(v)))
                    .collect(),
            ),
        }
    }

    /// Render as a YAML document.
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }

    /// Convert into a strongly-typed record.
    ///
    /// This is the single boundary between the untyped tree and typed
    /// configuration; call it only on validated trees.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, serde_yaml_ng::Error> {
        serde_yaml_ng::from_value(self.to_yaml())
    }
}

fn yaml_key_text(key: serde_yaml_ng::Value) -> String {
    match key {
        serde_yaml_ng::Value::String(s) => s,
        other => Node::from_yaml(other).scalar_text().unwrap_or_else(|| "<complex key>".to_string()),
    }
}

fn flatten_into(node: &Node, prefix: String, out: &mut BTreeMap<String, Node>) {
    match node {
        Node::Map(map) => {
            for (key, value) in map {
                let child = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(value, child, out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Int(i) => serializer.serialize_i64(*i),
            Node::Float(f) => serializer.serialize_f64(*f),
            Node::String(s) => serializer.serialize_str(s),
            Node::Seq(items) => serializer.collect_seq(items),
            Node::Map(map) => serializer.collect_map(map),
        }
    }
}

/// One step in a [`NodePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a node inside a document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Path of a mapping child.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Path of a sequence element.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// `self` followed by every segment of `other`.
    pub fn join(&self, other: &NodePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// The path with every index replaced by `[]`, used to key merge policies.
    pub fn schema_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                PathSegment::Index(_) => out.push_str("[]"),
            }
        }
        out
    }

    /// Parse the dotted form produced by `Display`. Malformed indexes are
    /// treated as keys.
    pub fn parse(dotted: &str) -> Self {
        let mut segments = Vec::new();
        for part in dotted.split('.').filter(|p| !p.is_empty()) {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(end) = stripped.find(']') else {
                    segments.push(PathSegment::Key(rest.to_string()));
                    break;
                };
                match stripped[..end].parse::<usize>() {
                    Ok(index) => segments.push(PathSegment::Index(index)),
                    Err(_) => segments.push(PathSegment::Key(stripped[..end].to_string())),
                }
                rest = &stripped[end + 1..];
            }
        }
        Self(segments)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        let mut first = true;
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

/// Precedence rank of a layer. Higher ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rank(pub u32);

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a document came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Logical name (`<defaults>`), file path, or `env:PREFIX_*`.
    pub source: String,
    pub rank: Rank,
}

impl Origin {
    pub fn new(source: impl Into<String>, rank: Rank) -> Self {
        Self {
            source: source.into(),
            rank,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rank {})", self.source, self.rank)
    }
}

/// A parsed source tagged with its provenance. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Node,
    origin: Origin,
}

impl Document {
    pub fn new(root: Node, origin: Origin) -> Self {
        Self { root, origin }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn rank(&self) -> Rank {
        self.origin.rank
    }
}
