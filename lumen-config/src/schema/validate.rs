use super::{Additional, SchemaRule, TypeName};
use crate::document::{Node, NodePath, Origin};
use std::fmt;

/// One failed schema rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationViolation {
    /// Where in the validated tree the rule failed.
    pub path: NodePath,
    /// The schema keyword that failed (`type`, `required`, `enum`, ...).
    pub rule: &'static str,
    pub detail: String,
    /// The layer that supplied the offending value, when known.
    pub origin: Option<Origin>,
}

impl ValidationViolation {
    fn new(path: &NodePath, rule: &'static str, detail: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            rule,
            detail: detail.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Option<Origin>) -> Self {
        self.origin = origin;
        self
    }

    /// Re-root the violation under `prefix` (a theme validated on its own
    /// is reported at `themes.<name>`).
    pub fn prefixed(mut self, prefix: &NodePath) -> Self {
        self.path = prefix.join(&self.path);
        self
    }
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.path, self.detail, self.rule)?;
        if let Some(origin) = &self.origin {
            write!(f, " (from {})", origin.source)?;
        }
        Ok(())
    }
}

pub(super) fn validate(rule: &SchemaRule, node: &Node, partial: bool) -> Vec<ValidationViolation> {
    let mut out = Vec::new();
    check(rule, node, &NodePath::root(), partial, &mut out);
    out
}

fn check(
    rule: &SchemaRule,
    node: &Node,
    path: &NodePath,
    partial: bool,
    out: &mut Vec<ValidationViolation>,
) {
    if !rule.types.is_empty() && !rule.types.iter().any(|t| t.accepts(node)) {
        out.push(ValidationViolation::new(
            path,
            "type",
            format!("expected {}, found {}", describe_types(&rule.types), node.kind()),
        ));
        return;
    }

    if let Some(values) = &rule.enum_values {
        if !values.iter().any(|v| same_value(v, node)) {
            out.push(ValidationViolation::new(
                path,
                "enum",
                format!("{} is not one of {}", render(node), render_list(values)),
            ));
        }
    }

    match node {
        Node::String(text) => {
            if let Some(pattern) = &rule.pattern {
                if !pattern.is_match(text) {
                    out.push(ValidationViolation::new(
                        path,
                        "pattern",
                        format!("{text:?} does not match /{}/", pattern.as_str()),
                    ));
                }
            }
        }
        Node::Int(_) | Node::Float(_) => check_range(rule, node, path, out),
        Node::Seq(items) => {
            if let Some(min) = rule.min_items {
                if items.len() < min {
                    out.push(ValidationViolation::new(
                        path,
                        "minItems",
                        format!("expected at least {min} item(s), found {}", items.len()),
                    ));
                }
            }
            if let Some(max) = rule.max_items {
                if items.len() > max {
                    out.push(ValidationViolation::new(
                        path,
                        "maxItems",
                        format!("expected at most {max} item(s), found {}", items.len()),
                    ));
                }
            }
            if let Some(item_rule) = &rule.items {
                for (index, item) in items.iter().enumerate() {
                    check(item_rule, item, &path.index(index), partial, out);
                }
            }
        }
        Node::Map(map) => {
            if !partial {
                for name in &rule.required {
                    if map.get(name).is_none_or(Node::is_null) {
                        out.push(ValidationViolation::new(
                            &path.key(name.as_str()),
                            "required",
                            format!("missing required key '{name}'"),
                        ));
                    }
                }
            }
            for (key, value) in map {
                // A null in an override layer means "not set".
                if partial && value.is_null() {
                    continue;
                }
                let child_path = path.key(key.as_str());
                if let Some(child_rule) = rule.properties.get(key) {
                    check(child_rule, value, &child_path, partial, out);
                    continue;
                }
                match &rule.additional {
                    Additional::Forbid => out.push(ValidationViolation::new(
                        &child_path,
                        "additionalProperties",
                        format!("unknown key '{key}'"),
                    )),
                    Additional::Any => {}
                    Additional::Rule(child_rule) => {
                        check(child_rule, value, &child_path, partial, out)
                    }
                }
            }
        }
        Node::Null | Node::Bool(_) => {}
    }
}

fn check_range(rule: &SchemaRule, node: &Node, path: &NodePath, out: &mut Vec<ValidationViolation>) {
    let Some(value) = node.as_f64() else {
        return;
    };
    if let Some(min) = rule.minimum {
        if value < min {
            out.push(ValidationViolation::new(
                path,
                "minimum",
                format!("{} is less than the minimum {min}", render(node)),
            ));
        }
    }
    if let Some(max) = rule.maximum {
        if value > max {
            out.push(ValidationViolation::new(
                path,
                "maximum",
                format!("{} is greater than the maximum {max}", render(node)),
            ));
        }
    }
}

fn describe_types(types: &[TypeName]) -> String {
    let names: Vec<String> = types.iter().map(ToString::to_string).collect();
    names.join(" or ")
}

/// Equality where `1` and `1.0` are the same number.
fn same_value(a: &Node, b: &Node) -> bool {
    match (a, b) {
        (Node::Int(_) | Node::Float(_), Node::Int(_) | Node::Float(_)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn render(node: &Node) -> String {
    match node {
        Node::String(s) => format!("{s:?}"),
        other => other
            .scalar_text()
            .unwrap_or_else(|| other.kind().to_string()),
    }
}

fn render_list(values: &[Node]) -> String {
    let items: Vec<String> = values.iter().map(render).collect();
    format!("[{}]", items.join(", "))
}
