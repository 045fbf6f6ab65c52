//! One load cycle: sources → layers → merge → validate → theme → snapshot.

use crate::defaults;
use crate::document::{NodePath, Origin};
use crate::env_vars::{ENV_PREFIX, Environment};
use crate::error::{ConfigError, LoadFailure, SchemaError};
use crate::loader::{DocumentLoader, SourceDescriptor};
use crate::merge::{LayerStack, MergePolicies, MergeStrategy, MergedConfig, merge_layers};
use crate::paths::ConfigPaths;
use crate::schema::Schema;
use crate::snapshot::{ConfigSnapshot, Generation, Settings};
use crate::themes::{DEFAULT_THEME, ResolvedTheme, ThemeCatalog};
use std::path::PathBuf;

/// File-name pattern for drop-in config files.
pub const CONFIG_PATTERN: &str = "*.{yaml,yml,toml}";
/// File-name pattern for user theme files.
pub const THEME_PATTERN: &str = "*.{yaml,yml}";

/// Everything needed to produce a [`ConfigSnapshot`] from scratch.
///
/// The builder is reused for every reload; each [`SnapshotBuilder::build`]
/// re-reads all sources.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    sources: Vec<SourceDescriptor>,
    theme_sources: Vec<SourceDescriptor>,
    config_schema: Schema,
    theme_schema: Schema,
    policies: MergePolicies,
    /// Fixed environment; `None` captures the process environment per build.
    environment: Option<Environment>,
}

impl SnapshotBuilder {
    /// Bundled defaults, bundled themes and bundled schemas only.
    pub fn new() -> Result<Self, SchemaError> {
        let config_schema = defaults::config_schema()?;
        let theme_schema = defaults::theme_schema()?;
        Ok(Self {
            sources: vec![defaults::config_source()],
            theme_sources: defaults::theme_sources(),
            policies: MergePolicies::from_schema(&config_schema),
            config_schema,
            theme_schema,
            environment: None,
        })
    }

    /// The standard layering: defaults, `config.yaml`, `config.d/*` in file
    /// name order, then `LUMEN_*` environment overrides. User themes come
    /// from `themes/*`.
    pub fn standard(paths: &ConfigPaths) -> Result<Self, SchemaError> {
        Ok(Self::new()?
            .with_source(SourceDescriptor::optional_file(paths.config_file()))
            .with_source(SourceDescriptor::glob(paths.dropin_dir(), CONFIG_PATTERN))
            .with_source(SourceDescriptor::env_overlay(ENV_PREFIX))
            .with_theme_source(SourceDescriptor::glob(paths.themes_dir(), THEME_PATTERN)))
    }

    /// Append a config source above every existing one.
    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    /// Append a theme source above every existing one.
    pub fn with_theme_source(mut self, source: SourceDescriptor) -> Self {
        self.theme_sources.push(source);
        self
    }

    /// Merge the config path `schema_path` (`[]` for sequence entries) with
    /// `strategy`, overriding any `x-merge` annotation.
    pub fn with_policy(mut self, schema_path: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.policies = self.policies.with(schema_path, strategy);
        self
    }

    /// Use `environment` instead of the process environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Directories holding file sources, for the watcher.
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for source in self.sources.iter().chain(&self.theme_sources) {
            let dir = match source {
                SourceDescriptor::File { path, .. } => path.parent().map(|p| p.to_path_buf()),
                SourceDescriptor::Glob { dir, .. } => Some(dir.clone()),
                SourceDescriptor::Embedded { .. } | SourceDescriptor::EnvOverlay { .. } => None,
            };
            if let Some(dir) = dir {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }

    fn environment(&self) -> Environment {
        self.environment.clone().unwrap_or_else(Environment::capture)
    }

    /// Run a full load cycle.
    ///
    /// Every problem found is returned, not just the first. Stages that
    /// depend on an earlier one (validation needs a merged tree) are skipped
    /// when it failed.
    pub fn build(&self, generation: Generation) -> Result<ConfigSnapshot, LoadFailure> {
        let environment = self.environment();
        let config = DocumentLoader::new(&environment).load_all(&self.sources);
        let themes = DocumentLoader::new(&environment).load_all(&self.theme_sources);

        let mut errors = config.errors;
        errors.extend(themes.errors);
        if !errors.is_empty() {
            return Err(LoadFailure::new(errors));
        }

        let stack = LayerStack::new(config.documents).map_err(|e| LoadFailure::new(vec![e]))?;
        let sources = stack.origins();
        let merged = merge_layers(&stack, &self.policies).map_err(LoadFailure::new)?;

        errors.extend(validate_merged(&self.config_schema, &merged));

        let mut catalog = ThemeCatalog::new(&self.theme_schema);
        for document in &themes.documents {
            errors.extend(catalog.add_document(document));
        }
        errors.extend(catalog.add_config_section(&merged));

        let theme_name = merged
            .get("theme")
            .and_then(|n| n.as_str())
            .unwrap_or(DEFAULT_THEME)
            .to_string();
        let selected_in = merged.origin_of(&NodePath::root().key("theme")).cloned();
        let theme = match catalog.resolve_from(&theme_name, selected_in.as_ref()) {
            Ok(theme) => Some(theme),
            Err(theme_errors) => {
                errors.extend(theme_errors);
                None
            }
        };

        let (Some(theme), true) = (theme, errors.is_empty()) else {
            return Err(LoadFailure::new(errors));
        };
        let settings: Settings = merged.root().to_typed().map_err(|e| {
            LoadFailure::new(vec![ConfigError::Conversion {
                path: NodePath::root().to_string(),
                message: e.to_string(),
            }])
        })?;

        Ok(ConfigSnapshot::new(generation, merged, settings, theme, sources))
    }

    /// Build the theme catalog, including inline themes from `merged` when
    /// given.
    pub fn theme_catalog(&self, merged: Option<&MergedConfig>) -> Result<ThemeCatalog, LoadFailure> {
        let environment = self.environment();
        let outcome = DocumentLoader::new(&environment).load_all(&self.theme_sources);
        let mut errors = outcome.errors;
        let mut catalog = ThemeCatalog::new(&self.theme_schema);
        for document in &outcome.documents {
            errors.extend(catalog.add_document(document));
        }
        if let Some(merged) = merged {
            errors.extend(catalog.add_config_section(merged));
        }
        if errors.is_empty() {
            Ok(catalog)
        } else {
            Err(LoadFailure::new(errors))
        }
    }

    /// Check every source on its own: each config layer against the config
    /// schema with `required` relaxed, and every theme in the catalog.
    pub fn check_sources(&self) -> Vec<ConfigError> {
        let environment = self.environment();
        let config = DocumentLoader::new(&environment).load_all(&self.sources);
        let mut errors = config.errors;
        for document in &config.documents {
            for violation in self.config_schema.validate_partial(document.root()) {
                errors.push(
                    violation
                        .with_origin(Some(document.origin().clone()))
                        .into(),
                );
            }
        }

        match self.theme_catalog(None) {
            Ok(catalog) => {
                if let Err(theme_errors) = catalog.resolve_all() {
                    errors.extend(theme_errors);
                }
            }
            Err(failure) => errors.extend(failure.into_errors()),
        }
        errors
    }
}

/// Validate the merged tree, naming the layer behind each violation.
fn validate_merged(schema: &Schema, merged: &MergedConfig) -> Vec<ConfigError> {
    schema
        .validate(merged.root())
        .into_iter()
        .map(|violation| {
            let origin: Option<Origin> = merged.origin_of(&violation.path).cloned();
            violation.with_origin(origin).into()
        })
        .collect()
}

/// Resolve a single theme against the builder's catalog.
pub fn resolve_theme(
    builder: &SnapshotBuilder,
    merged: Option<&MergedConfig>,
    name: &str,
) -> Result<ResolvedTheme, LoadFailure> {
    builder
        .theme_catalog(merged)?
        .resolve(name)
        .map_err(LoadFailure::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;

    fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new()
            .expect("bundled schemas compile")
            .with_environment(Environment::empty())
    }

    #[test]
    fn test_defaults_alone_produce_a_valid_snapshot() {
        let snapshot = builder().build(1).expect("defaults are valid");
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.theme().name(), DEFAULT_THEME);
        assert_eq!(snapshot.settings().theme, None);
        assert!(snapshot.settings().watch.enabled);
        assert_eq!(snapshot.sources().len(), 1);
        assert_eq!(snapshot.sources()[0].source, defaults::DEFAULTS_NAME);
    }

    #[test]
    fn test_policy_overrides_schema_annotation() {
        let user = SourceDescriptor::embedded("user", "fields:\n  ignore: [\"tmp*\"]\n");
        let appended = builder().with_source(user.clone()).build(1).expect("valid");
        assert_eq!(
            appended.get("fields.ignore"),
            Some(&Node::Seq(vec![Node::String("_*".into()), Node::String("tmp*".into())]))
        );

        let replaced = builder()
            .with_policy("fields.ignore", MergeStrategy::Replace)
            .with_source(user)
            .build(1)
            .expect("valid");
        assert_eq!(
            replaced.get("fields.ignore"),
            Some(&Node::Seq(vec![Node::String("tmp*".into())]))
        );
    }

    #[test]
    fn test_env_overlay_is_highest_layer() {
        let snapshot = builder()
            .with_source(SourceDescriptor::env_overlay(ENV_PREFIX))
            .with_environment(Environment::from_pairs([
                ("LUMEN_WATCH__DEBOUNCE_MS", "500"),
                ("LUMEN_THEME", "nord"),
            ]))
            .build(3)
            .expect("valid");
        assert_eq!(snapshot.settings().watch.debounce_ms, 500);
        assert_eq!(snapshot.theme().name(), "nord");
        assert_eq!(snapshot.get("watch.debounce-ms"), Some(&Node::Int(500)));
    }

    #[test]
    fn test_every_problem_is_reported_together() {
        let failure = builder()
            .with_environment(Environment::from_pairs([
                ("LUMEN_WATCH__DEBOUNCE_MS", "-5"),
                ("LUMEN_INPUT_INFO", "sometimes"),
                ("LUMEN_THEME", "ghost"),
            ]))
            .with_source(SourceDescriptor::env_overlay(ENV_PREFIX))
            .build(1)
            .unwrap_err();
        assert_eq!(failure.violations().count(), 2);
        assert!(
            failure
                .errors()
                .iter()
                .any(|e| matches!(e, ConfigError::UnknownTheme { name, .. } if name == "ghost"))
        );
        let report = failure.to_string();
        assert!(report.contains("watch.debounce-ms"));
        assert!(report.contains("(from env:LUMEN_*)"));
        assert!(report.contains("unknown theme 'ghost' in env:LUMEN_*"));
    }

    #[test]
    fn test_section_conversion() {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "kebab-case")]
        struct Punctuation {
            field_key_value_separator: String,
        }
        let snapshot = builder().build(1).expect("valid");
        let punctuation: Punctuation = snapshot
            .section("formatting.punctuation")
            .expect("converts");
        assert_eq!(punctuation.field_key_value_separator, "=");
        assert!(matches!(
            snapshot.section::<Punctuation>("no.such.section"),
            Err(ConfigError::Conversion { .. })
        ));
    }

    #[test]
    fn test_check_sources_relaxes_required() {
        let errors = builder()
            .with_source(SourceDescriptor::env_overlay(ENV_PREFIX))
            .with_environment(Environment::from_pairs([("LUMEN_WATCH__ENABLED", "maybe")]))
            .check_sources();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].to_string().starts_with("watch.enabled:"));
    }

    #[test]
    fn test_watch_dirs() {
        let paths = ConfigPaths::new("/cfg");
        let builder = SnapshotBuilder::standard(&paths).expect("schemas compile");
        assert_eq!(
            builder.watch_dirs(),
            [
                PathBuf::from("/cfg"),
                PathBuf::from("/cfg/config.d"),
                PathBuf::from("/cfg/themes")
            ]
        );
    }
}
