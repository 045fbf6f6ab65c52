//! Documents bundled into the binary, and default value functions used as
//! `#[serde(default = "crate::defaults::...")]` attributes on typed settings.

use crate::error::SchemaError;
use crate::loader::SourceDescriptor;
use crate::schema::Schema;

/// Logical source name of the built-in config layer.
pub const DEFAULTS_NAME: &str = "<defaults>";

pub const CONFIG: &str = include_str!("../assets/config.yaml");
pub const CONFIG_SCHEMA: &str = include_str!("../assets/config.schema.yaml");
pub const THEME_SCHEMA: &str = include_str!("../assets/theme.schema.yaml");

/// Bundled theme documents as (logical name, contents), base theme first.
pub const THEMES: &[(&str, &str)] = &[
    (
        "<themes:default>",
        include_str!("../assets/themes/default.yaml"),
    ),
    (
        "<themes:builtin>",
        include_str!("../assets/themes/builtin.yaml"),
    ),
];

/// The built-in config as the lowest-ranked source.
pub fn config_source() -> SourceDescriptor {
    SourceDescriptor::embedded(DEFAULTS_NAME, CONFIG)
}

/// Bundled theme documents as sources.
pub fn theme_sources() -> Vec<SourceDescriptor> {
    THEMES
        .iter()
        .map(|(name, contents)| SourceDescriptor::embedded(*name, contents))
        .collect()
}

pub fn config_schema() -> Result<Schema, SchemaError> {
    Schema::from_yaml_str("config.schema.yaml", CONFIG_SCHEMA)
}

pub fn theme_schema() -> Result<Schema, SchemaError> {
    Schema::from_yaml_str("theme.schema.yaml", THEME_SCHEMA)
}

pub fn watch_enabled() -> bool {
    true
}

pub fn debounce_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;
    use crate::merge::MergeStrategy;
    use crate::themes::{DEFAULT_THEME, ThemeCatalog};
    use crate::{document::Document, document::Origin, document::Rank};

    fn yaml(text: &str) -> Node {
        Node::from_yaml(serde_yaml_ng::from_str(text).expect("bundled yaml parses"))
    }

    #[test]
    fn test_bundled_schemas_compile() {
        config_schema().expect("config schema compiles");
        theme_schema().expect("theme schema compiles");
    }

    #[test]
    fn test_bundled_config_is_valid_on_its_own() {
        let schema = config_schema().expect("config schema compiles");
        let violations = schema.validate(&yaml(CONFIG));
        assert!(violations.is_empty(), "{violations:#?}");
    }

    #[test]
    fn test_config_schema_merge_annotations() {
        let schema = config_schema().expect("config schema compiles");
        let annotations = schema.merge_annotations();
        assert!(annotations.contains(&("fields.hide".to_string(), MergeStrategy::Append)));
        assert!(annotations.contains(&(
            "fields.predefined.level.variants".to_string(),
            MergeStrategy::MergeByKey("level".to_string())
        )));
        assert!(annotations.contains(&(
            "fields.predefined.level.variants[].values".to_string(),
            MergeStrategy::Append
        )));
    }

    #[test]
    fn test_every_bundled_theme_resolves() {
        let schema = theme_schema().expect("theme schema compiles");
        let mut catalog = ThemeCatalog::new(&schema);
        for (name, contents) in THEMES {
            let errors = catalog.add_document(&Document::new(yaml(contents), Origin::new(*name, Rank(0))));
            assert!(errors.is_empty(), "{errors:#?}");
        }
        let themes = catalog.resolve_all().expect("bundled themes resolve");
        assert!(themes.contains_key(DEFAULT_THEME));
        assert_eq!(themes["nord"].chain(), ["nord", "dark"]);
        assert_eq!(themes["universal"].chain(), ["universal", "default"]);
        assert_eq!(catalog.chain(DEFAULT_THEME).expect("chain"), [DEFAULT_THEME]);
    }
}
