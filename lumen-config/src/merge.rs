//! Layer merging.
//!
//! Combines an ordered list of documents into one [`MergedConfig`]:
//! - scalars: the higher layer overrides
//! - mappings: deep merge, key by key; keys absent from the higher layer keep
//!   the lower value
//! - sequences: `replace` (default), `append`, or `merge-by-key` on a
//!   declared identity field
//! - any kind, when the path is declared `override`: the higher value
//!   replaces the lower one wholesale
//!
//! A mapping or sequence meeting a value of another kind, with no
//! `override` policy at that path, is a [`ConfigError::MergeConflict`]. All
//! conflicts in the tree are collected before the merge fails.
//!
//! An explicit `null` in a higher layer means "not set" and keeps the lower
//! value.

use crate::document::{Document, Node, NodePath, Origin, Rank};
use crate::error::ConfigError;
use crate::schema::Schema;
use std::collections::BTreeMap;

/// How two values at the same path combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Sequences: the higher sequence replaces the lower one.
    Replace,
    /// Sequences: higher entries are appended after the lower ones.
    Append,
    /// Sequences of mappings: entries are matched on the named identity field
    /// and deep-merged; unmatched higher entries are appended.
    MergeByKey(String),
    /// Any kind: the higher value replaces the lower one, even when their
    /// kinds differ.
    Override,
}

impl MergeStrategy {
    /// Parse the `x-merge` schema annotation.
    pub fn from_annotation(name: &str, key: Option<&str>) -> Result<Self, String> {
        match (name, key) {
            ("replace", _) => Ok(MergeStrategy::Replace),
            ("append", _) => Ok(MergeStrategy::Append),
            ("override", _) => Ok(MergeStrategy::Override),
            ("merge-by-key", Some(key)) => Ok(MergeStrategy::MergeByKey(key.to_string())),
            ("merge-by-key", None) => Err("`merge-by-key` requires `x-merge-key`".to_string()),
            (other, _) => Err(format!(
                "unknown merge strategy '{other}' (expected replace, append, merge-by-key or override)"
            )),
        }
    }
}

/// Merge strategies keyed by schema path (`fields.hide`,
/// `fields.predefined.level.variants`, `panes[].widgets`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePolicies {
    by_path: BTreeMap<String, MergeStrategy>,
}

impl MergePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies declared with `x-merge` annotations in `schema`.
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            by_path: schema.merge_annotations().into_iter().collect(),
        }
    }

    /// Set the strategy for `schema_path`, replacing any earlier one.
    pub fn with(mut self, schema_path: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.by_path.insert(schema_path.into(), strategy);
        self
    }

    pub fn get(&self, schema_path: &str) -> Option<&MergeStrategy> {
        self.by_path.get(schema_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MergeStrategy)> {
        self.by_path.iter()
    }
}

/// Documents ordered by strictly increasing rank.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: Vec<Document>,
}

impl LayerStack {
    /// Order `documents` by rank. Two documents sharing a rank is an error.
    pub fn new(mut documents: Vec<Document>) -> Result<Self, ConfigError> {
        documents.sort_by_key(Document::rank);
        for pair in documents.windows(2) {
            if pair[0].rank() == pair[1].rank() {
                return Err(ConfigError::DuplicateRank {
                    rank: pair[0].rank().0,
                    first: pair[0].origin().source.clone(),
                    second: pair[1].origin().source.clone(),
                });
            }
        }
        Ok(Self { layers: documents })
    }

    pub fn layers(&self) -> &[Document] {
        &self.layers
    }

    pub fn origins(&self) -> Vec<Origin> {
        self.layers.iter().map(|d| d.origin().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// The result of merging a layer stack.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    root: Node,
    /// Which layer last wrote each path (keyed by `NodePath` display form).
    origins: BTreeMap<String, Origin>,
}

impl MergedConfig {
    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn get(&self, dotted: &str) -> Option<&Node> {
        self.root.lookup_dotted(dotted)
    }

    /// The origin recorded for `path` or its nearest recorded ancestor.
    pub fn origin_of(&self, path: &NodePath) -> Option<&Origin> {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if let Some(origin) = self.origins.get(&p.to_string()) {
                return Some(origin);
            }
            current = p.parent();
        }
        None
    }

    pub fn origins(&self) -> &BTreeMap<String, Origin> {
        &self.origins
    }
}

/// Merge a layer stack, lowest rank first.
pub fn merge_layers(
    stack: &LayerStack,
    policies: &MergePolicies,
) -> Result<MergedConfig, Vec<ConfigError>> {
    merge_documents(stack.layers(), policies)
}

/// Merge documents in the given order (later wins) without checking ranks.
///
/// Used directly for theme inheritance chains, whose documents come from
/// different files but combine in derivation order.
pub fn merge_documents<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    policies: &MergePolicies,
) -> Result<MergedConfig, Vec<ConfigError>> {
    let mut merger = Merger {
        policies,
        origins: BTreeMap::new(),
        conflicts: Vec::new(),
    };
    let root_path = NodePath::root();
    let mut root = Node::empty_map();
    for document in documents {
        root = merger
            .merge_value(Some(root), document.root(), document.origin(), &root_path)
            .unwrap_or_else(Node::empty_map);
    }
    if merger.conflicts.is_empty() {
        Ok(MergedConfig {
            root,
            origins: merger.origins,
        })
    } else {
        Err(merger.conflicts)
    }
}

struct Merger<'p> {
    policies: &'p MergePolicies,
    origins: BTreeMap<String, Origin>,
    conflicts: Vec<ConfigError>,
}

impl Merger<'_> {
    fn merge_value(
        &mut self,
        lower: Option<Node>,
        higher: &Node,
        origin: &Origin,
        path: &NodePath,
    ) -> Option<Node> {
        if higher.is_null() {
            return lower;
        }
        let strategy = self.policies.get(&path.schema_path()).cloned();

        if strategy == Some(MergeStrategy::Override) {
            self.record_subtree(path, origin);
            return Some(higher.without_nulls());
        }

        let lower = match lower {
            Some(lower) if !lower.is_null() => lower,
            _ => {
                // First writer. Sequences still go through the merge so that
                // merge-by-key identities are checked on every layer.
                if let Node::Seq(items) = higher {
                    let merged = self.merge_seq(Vec::new(), items, strategy.as_ref(), origin, path);
                    return Some(Node::Seq(merged));
                }
                if let Node::Map(_) = higher {
                    return self.merge_value(Some(Node::empty_map()), higher, origin, path);
                }
                self.record(path, origin);
                return Some(higher.clone());
            }
        };

        match (lower, higher) {
            (Node::Map(mut lower_map), Node::Map(higher_map)) => {
                self.record(path, origin);
                for (key, value) in higher_map {
                    let child_path = path.key(key.as_str());
                    let existing = lower_map.remove(key);
                    if let Some(merged) = self.merge_value(existing, value, origin, &child_path) {
                        lower_map.insert(key.clone(), merged);
                    }
                }
                Some(Node::Map(lower_map))
            }
            (Node::Seq(lower_items), Node::Seq(higher_items)) => Some(Node::Seq(self.merge_seq(
                lower_items,
                higher_items,
                strategy.as_ref(),
                origin,
                path,
            ))),
            (lower, higher) if lower.is_container() || higher.is_container() => {
                self.conflict(
                    path,
                    origin,
                    format!("cannot merge {} with {}", lower.kind(), higher.kind()),
                );
                Some(lower)
            }
            (_, higher) => {
                self.record(path, origin);
                Some(higher.clone())
            }
        }
    }

    fn merge_seq(
        &mut self,
        lower: Vec<Node>,
        higher: &[Node],
        strategy: Option<&MergeStrategy>,
        origin: &Origin,
        path: &NodePath,
    ) -> Vec<Node> {
        // Append and merge-by-key never move existing entries, so the
        // origins recorded under them stay valid.
        match strategy {
            Some(MergeStrategy::Append) => {
                self.pin_entries(path, lower.len());
                let mut items = lower;
                for entry in higher {
                    let entry_path = path.index(items.len());
                    items.push(self.merge_value(None, entry, origin, &entry_path).unwrap_or_default());
                }
                self.record(path, origin);
                items
            }
            Some(MergeStrategy::MergeByKey(field)) => {
                self.pin_entries(path, lower.len());
                let items = self.merge_by_key(lower, higher, field, origin, path);
                self.record(path, origin);
                items
            }
            Some(MergeStrategy::Replace) | Some(MergeStrategy::Override) | None => {
                self.record_subtree(path, origin);
                higher.iter().map(Node::without_nulls).collect()
            }
        }
    }

    /// Matched entries stay in lower-rank order; new entries follow in the
    /// order they appear in the higher layer.
    fn merge_by_key(
        &mut self,
        lower: Vec<Node>,
        higher: &[Node],
        field: &str,
        origin: &Origin,
        path: &NodePath,
    ) -> Vec<Node> {
        let mut positions: BTreeMap<String, usize> = BTreeMap::new();
        for (index, entry) in lower.iter().enumerate() {
            if let Some(id) = identity(entry, field) {
                positions.entry(id).or_insert(index);
            }
        }

        let mut items = lower;
        let mut seen_in_layer: Vec<String> = Vec::new();
        for (index, entry) in higher.iter().enumerate() {
            let Some(id) = identity(entry, field) else {
                self.conflict(
                    &path.index(index),
                    origin,
                    format!("entry has no identity field `{field}` required by merge-by-key"),
                );
                continue;
            };
            if seen_in_layer.contains(&id) {
                self.conflict(
                    &path.index(index),
                    origin,
                    format!("duplicate entry with {field} = {id}"),
                );
                continue;
            }
            seen_in_layer.push(id.clone());

            match positions.get(&id) {
                Some(&position) => {
                    let existing = std::mem::take(&mut items[position]);
                    items[position] = self
                        .merge_value(Some(existing), entry, origin, &path.index(position))
                        .unwrap_or_default();
                }
                None => {
                    let entry_path = path.index(items.len());
                    let added = self
                        .merge_value(None, entry, origin, &entry_path)
                        .unwrap_or_default();
                    positions.insert(id, items.len());
                    items.push(added);
                }
            }
        }
        items
    }

    /// Give each of the first `len` entries under `path` its own record, so
    /// recording the sequence itself does not reattribute them.
    fn pin_entries(&mut self, path: &NodePath, len: usize) {
        for index in 0..len {
            let entry = path.index(index);
            if self.origins.contains_key(&entry.to_string()) {
                continue;
            }
            if let Some(origin) = self.nearest_origin(&entry).cloned() {
                self.record(&entry, &origin);
            }
        }
    }

    fn record(&mut self, path: &NodePath, origin: &Origin) {
        self.origins.insert(path.to_string(), origin.clone());
    }

    /// Record `path` and forget origins recorded underneath it, whose
    /// positions may no longer hold.
    fn record_subtree(&mut self, path: &NodePath, origin: &Origin) {
        if !path.is_root() {
            let prefix = path.to_string();
            self.origins.retain(|key, _| {
                !(key.len() > prefix.len()
                    && key.starts_with(&prefix)
                    && matches!(key.as_bytes()[prefix.len()], b'.' | b'['))
            });
        }
        self.record(path, origin);
    }

    fn conflict(&mut self, path: &NodePath, higher: &Origin, detail: String) {
        let lower = self
            .nearest_origin(path)
            .cloned()
            .unwrap_or_else(|| Origin::new("<unknown>", Rank::default()));
        self.conflicts.push(ConfigError::MergeConflict {
            path: path.clone(),
            lower,
            higher: higher.clone(),
            detail,
        });
    }

    fn nearest_origin(&self, path: &NodePath) -> Option<&Origin> {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if let Some(origin) = self.origins.get(&p.to_string()) {
                return Some(origin);
            }
            current = p.parent();
        }
        None
    }
}

fn identity(entry: &Node, field: &str) -> Option<String> {
    entry.get(field).and_then(Node::scalar_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str, rank: u32) -> Document {
        let root = Node::from_yaml(serde_yaml_ng::from_str(text).expect("valid yaml"));
        Document::new(root, Origin::new(format!("layer{rank}"), Rank(rank)))
    }

    fn merge(layers: &[Document], policies: &MergePolicies) -> MergedConfig {
        let stack = LayerStack::new(layers.to_vec()).expect("distinct ranks");
        merge_layers(&stack, policies).expect("merge succeeds")
    }

    fn yaml(node: &Node) -> String {
        node.to_yaml_string().expect("serialisable")
    }

    #[test]
    fn test_scalar_precedence_ignores_key_order() {
        let low = doc("b: 1\na: low\nc: 3\n", 0);
        let high = doc("c: 4\na: high\n", 1);
        let merged = merge(&[low, high], &MergePolicies::new());
        assert_eq!(merged.get("a"), Some(&Node::String("high".into())));
        assert_eq!(merged.get("b"), Some(&Node::Int(1)));
        assert_eq!(merged.get("c"), Some(&Node::Int(4)));
    }

    #[test]
    fn test_stack_order_not_argument_order() {
        let low = doc("a: low\n", 0);
        let high = doc("a: high\n", 1);
        let merged = merge(&[high, low], &MergePolicies::new());
        assert_eq!(merged.get("a"), Some(&Node::String("high".into())));
    }

    #[test]
    fn test_deep_merge_keeps_absent_keys() {
        let low = doc("watch:\n  enabled: true\n  debounce-ms: 250\n", 0);
        let high = doc("watch:\n  debounce-ms: 500\n", 1);
        let merged = merge(&[low, high], &MergePolicies::new());
        assert_eq!(merged.get("watch.enabled"), Some(&Node::Bool(true)));
        assert_eq!(merged.get("watch.debounce-ms"), Some(&Node::Int(500)));
    }

    #[test]
    fn test_null_keeps_lower_value() {
        let low = doc("theme: classic\n", 0);
        let high = doc("theme: ~\n", 1);
        let merged = merge(&[low, high], &MergePolicies::new());
        assert_eq!(merged.get("theme"), Some(&Node::String("classic".into())));
    }

    #[test]
    fn test_idempotent_merge() {
        let layers = [
            doc("z: 1\na:\n  y: [1, 2]\n  b: x\n", 0),
            doc("a:\n  b: y\n  c: {d: 1}\n", 1),
        ];
        let policies = MergePolicies::new().with("a.y", MergeStrategy::Append);
        let first = merge(&layers, &policies);
        let second = merge(&layers, &policies);
        assert_eq!(first, second);
        assert_eq!(yaml(first.root()), yaml(second.root()));
    }

    #[test]
    fn test_sequence_replace_by_default() {
        let merged = merge(
            &[doc("hide: [a, b]\n", 0), doc("hide: [c]\n", 1)],
            &MergePolicies::new(),
        );
        assert_eq!(merged.get("hide"), Some(&Node::Seq(vec![Node::String("c".into())])));
    }

    #[test]
    fn test_sequence_append() {
        let policies = MergePolicies::new().with("fields.ignore", MergeStrategy::Append);
        let merged = merge(
            &[
                doc("fields:\n  ignore: [a]\n", 0),
                doc("fields:\n  ignore: [b]\n", 1),
                doc("fields:\n  ignore: [c]\n", 2),
            ],
            &policies,
        );
        let names: Vec<&str> = merged
            .get("fields.ignore")
            .and_then(Node::as_seq)
            .expect("sequence")
            .iter()
            .filter_map(Node::as_str)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_merge_by_key_order() {
        let policies = MergePolicies::new().with("items", MergeStrategy::MergeByKey("id".into()));
        let merged = merge(
            &[
                doc("items: [{id: a, v: 1}, {id: b, v: 2}]\n", 0),
                doc("items: [{id: b, v: 99}, {id: c, v: 3}]\n", 1),
            ],
            &policies,
        );
        let expected = doc("items: [{id: a, v: 1}, {id: b, v: 99}, {id: c, v: 3}]\n", 9);
        assert_eq!(merged.root(), expected.root());
    }

    #[test]
    fn test_merge_by_key_deep_merges_matched_entries() {
        let policies = MergePolicies::new()
            .with("levels", MergeStrategy::MergeByKey("level".into()))
            .with("levels[].names", MergeStrategy::Append);
        let merged = merge(
            &[
                doc("levels:\n  - {level: info, names: [info], color: blue}\n", 0),
                doc("levels:\n  - {level: info, names: [inf]}\n", 1),
            ],
            &policies,
        );
        assert_eq!(
            merged.get("levels[0].color"),
            Some(&Node::String("blue".into()))
        );
        assert_eq!(
            merged.get("levels[0].names").and_then(Node::as_seq).map(<[Node]>::len),
            Some(2)
        );
    }

    #[test]
    fn test_entry_origins_survive_merge_by_key_and_append() {
        let policies = MergePolicies::new()
            .with("items", MergeStrategy::MergeByKey("id".into()))
            .with("tags", MergeStrategy::Append)
            .with("plain", MergeStrategy::Replace);
        let merged = merge(
            &[
                doc("items: [{id: a, v: 1}, {id: b, v: 2}]
tags: [x]
plain: [{v: 1}]
", 0),
                doc("items: [{id: b, v: 99}, {id: c}]
tags: [y]
plain: [{v: 2}]
", 1),
            ],
            &policies,
        );
        let source = |path: &str| {
            merged
                .origin_of(&NodePath::parse(path))
                .map(|o| o.source.clone())
                .unwrap_or_default()
        };
        assert_eq!(source("items[0].v"), "layer0");
        assert_eq!(source("items[0]"), "layer0");
        assert_eq!(source("items[1].v"), "layer1");
        assert_eq!(source("items[2].id"), "layer1");
        assert_eq!(source("tags[0]"), "layer0");
        assert_eq!(source("tags[1]"), "layer1");
        assert_eq!(source("plain[0].v"), "layer1");
    }

    #[test]
    fn test_merge_by_key_reports_missing_and_duplicate_identity() {
        let policies = MergePolicies::new().with("items", MergeStrategy::MergeByKey("id".into()));
        let stack = LayerStack::new(vec![
            doc("items: [{id: a}]\n", 0),
            doc("items: [{v: 1}, {id: b}, {id: b}]\n", 1),
        ])
        .expect("stack");
        let errors = merge_layers(&stack, &policies).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("items[0]"));
        assert!(errors[1].to_string().contains("duplicate entry with id = b"));
    }

    #[test]
    fn test_type_conflict_collects_all() {
        let stack = LayerStack::new(vec![
            doc("a: {x: 1}\nb: [1]\nc: 1\n", 0),
            doc("a: scalar\nb: {y: 2}\nc: 2\n", 1),
        ])
        .expect("stack");
        let errors = merge_layers(&stack, &MergePolicies::new()).unwrap_err();
        assert_eq!(errors.len(), 2);
        match &errors[0] {
            ConfigError::MergeConflict {
                path,
                lower,
                higher,
                ..
            } => {
                assert_eq!(path.to_string(), "a");
                assert_eq!(lower.source, "layer0");
                assert_eq!(higher.source, "layer1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_policy_resolves_type_conflict() {
        let policies = MergePolicies::new().with("a", MergeStrategy::Override);
        let merged = merge(&[doc("a: {x: 1}\n", 0), doc("a: off\n", 1)], &policies);
        assert_eq!(merged.get("a"), Some(&Node::String("off".into())));
    }

    #[test]
    fn test_scalars_of_different_types_override() {
        let merged = merge(&[doc("a: 1\n", 0), doc("a: one\n", 1)], &MergePolicies::new());
        assert_eq!(merged.get("a"), Some(&Node::String("one".into())));
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let err = LayerStack::new(vec![doc("a: 1\n", 1), doc("b: 1\n", 1)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRank { rank: 1, .. }));
    }

    #[test]
    fn test_origins_track_winning_layer() {
        let merged = merge(
            &[doc("a: {x: 1, y: 2}\n", 0), doc("a: {y: 3}\n", 1)],
            &MergePolicies::new(),
        );
        assert_eq!(
            merged.origin_of(&NodePath::parse("a.x")).map(|o| o.source.as_str()),
            Some("layer0")
        );
        assert_eq!(
            merged.origin_of(&NodePath::parse("a.y")).map(|o| o.source.as_str()),
            Some("layer1")
        );
        assert_eq!(
            merged.origin_of(&NodePath::parse("a.missing")).map(|o| o.source.as_str()),
            Some("layer1")
        );
    }

    #[test]
    fn test_strategy_annotation_parsing() {
        assert_eq!(
            MergeStrategy::from_annotation("merge-by-key", Some("id")),
            Ok(MergeStrategy::MergeByKey("id".into()))
        );
        assert!(MergeStrategy::from_annotation("merge-by-key", None).is_err());
        assert!(MergeStrategy::from_annotation("zip", None).is_err());
    }
}
