//! Subcommand implementations.
//!
//! Each command returns the process exit code; `Err` is reserved for
//! failures outside the configuration itself (I/O, a broken bundled schema).

use crate::cli::{Commands, RuntimeOptions, SchemaKind};
use anyhow::{Context, Result};
use lumen_config::defaults;
use lumen_config::pipeline::resolve_theme;
use lumen_config::{
    ConfigPaths, ConfigSnapshot, Environment, LoadFailure, Node, ReloadCoordinator, ResolvedTheme,
    SnapshotBuilder,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Run `command` and return the exit code.
pub fn run(command: Commands, options: &RuntimeOptions) -> Result<i32> {
    let builder = builder(options)?;
    match command {
        Commands::Check { each } => check(&builder, each),
        Commands::Show { path, json } => show(&builder, path.as_deref(), json),
        Commands::Theme { name } => theme(&builder, name.as_deref()),
        Commands::Themes => themes(&builder),
        Commands::Schema { kind } => schema(kind),
        Commands::Watch => watch(builder),
    }
}

fn builder(options: &RuntimeOptions) -> Result<SnapshotBuilder> {
    let paths = match &options.config_dir {
        Some(dir) => ConfigPaths::new(dir),
        None => ConfigPaths::discover(&Environment::capture()),
    };
    log::debug!("Using config directory {}", paths.root().display());
    SnapshotBuilder::standard(&paths).context("Bundled schema is invalid")
}

/// Print a failure report to stderr.
fn report(failure: &LoadFailure) {
    eprint!("{failure}");
}

/// Build a snapshot, printing the report on failure.
fn load(builder: &SnapshotBuilder) -> Option<ConfigSnapshot> {
    match builder.build(1) {
        Ok(snapshot) => Some(snapshot),
        Err(failure) => {
            report(&failure);
            None
        }
    }
}

fn check(builder: &SnapshotBuilder, each: bool) -> Result<i32> {
    let mut ok = true;

    if each {
        let errors = builder.check_sources();
        if errors.is_empty() {
            println!("every source is valid on its own");
        } else {
            ok = false;
            report(&LoadFailure::new(errors));
        }
    }

    if let Some(snapshot) = load(builder) {
        println!(
            "configuration OK: {} layer(s), theme '{}'",
            snapshot.sources().len(),
            snapshot.theme().name()
        );
        for origin in snapshot.sources() {
            println!("  {origin}");
        }
    } else {
        ok = false;
    }

    Ok(if ok { 0 } else { 1 })
}

fn show(builder: &SnapshotBuilder, path: Option<&str>, json: bool) -> Result<i32> {
    let Some(snapshot) = load(builder) else {
        return Ok(1);
    };
    let node: &Node = match path {
        Some(path) => match snapshot.get(path) {
            Some(node) => node,
            None => {
                eprintln!("lumen: no configuration value at '{path}'");
                return Ok(1);
            }
        },
        None => snapshot.root(),
    };

    let rendered = if json {
        let mut text = serde_json::to_string_pretty(node).context("Failed to render JSON")?;
        text.push('\n');
        text
    } else {
        serde_yaml_ng::to_string(node).context("Failed to render YAML")?
    };
    io::stdout().write_all(rendered.as_bytes())?;
    Ok(0)
}

fn theme(builder: &SnapshotBuilder, name: Option<&str>) -> Result<i32> {
    let Some(snapshot) = load(builder) else {
        return Ok(1);
    };
    let resolved: ResolvedTheme = match name {
        None => snapshot.theme().clone(),
        Some(name) => match resolve_theme(builder, Some(snapshot.merged()), name) {
            Ok(theme) => theme,
            Err(failure) => {
                report(&failure);
                return Ok(1);
            }
        },
    };

    let mut out = io::stdout().lock();
    writeln!(out, "theme: {}", resolved.name())?;
    writeln!(out, "chain: {}", resolved.chain().join(" -> "))?;
    let tags = resolved.tags();
    if !tags.is_empty() {
        writeln!(out, "tags: {}", tags.join(", "))?;
    }
    for (key, value) in resolved.attributes() {
        writeln!(out, "{key} = {}", render_value(value))?;
    }
    Ok(0)
}

fn render_value(value: &Node) -> String {
    match value {
        Node::Seq(items) => {
            let items: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.scalar_text().unwrap_or_default(),
    }
}

fn themes(builder: &SnapshotBuilder) -> Result<i32> {
    let Some(snapshot) = load(builder) else {
        return Ok(1);
    };
    let catalog = match builder.theme_catalog(Some(snapshot.merged())) {
        Ok(catalog) => catalog,
        Err(failure) => {
            report(&failure);
            return Ok(1);
        }
    };
    let selected = snapshot.theme().name();
    for name in catalog.names() {
        let marker = if name == selected { "*" } else { " " };
        match catalog.chain(name) {
            Ok(chain) if chain.len() > 1 => {
                println!("{marker} {name} (extends {})", chain[1..].join(" -> "))
            }
            Ok(_) => println!("{marker} {name}"),
            Err(e) => println!("{marker} {name} (broken: {e})"),
        }
    }
    Ok(0)
}

fn schema(kind: SchemaKind) -> Result<i32> {
    let text = match kind {
        SchemaKind::Config => defaults::CONFIG_SCHEMA,
        SchemaKind::Theme => defaults::THEME_SCHEMA,
    };
    io::stdout().write_all(text.as_bytes())?;
    Ok(0)
}

fn watch(builder: SnapshotBuilder) -> Result<i32> {
    let coordinator = match ReloadCoordinator::start(builder) {
        Ok(coordinator) => Arc::new(coordinator),
        Err(e) => {
            report(e.failure());
            return Ok(1);
        }
    };
    let snapshot = coordinator
        .current()
        .context("No snapshot published after a successful load")?;
    let settings = snapshot.settings().watch.clone();
    println!(
        "generation {}: theme '{}'",
        snapshot.generation(),
        snapshot.theme().name()
    );
    if !settings.enabled {
        println!("watching is disabled (watch.enabled: false)");
        return Ok(0);
    }

    let subscription = coordinator.subscribe();
    let handle = coordinator
        .watch(Duration::from_millis(settings.debounce_ms))
        .context("Failed to start watching the config directory")?;
    for dir in handle.dirs() {
        println!("watching {}", dir.display());
    }
    for dir in handle.pending() {
        println!("waiting for {}", dir.display());
    }

    // Rejected reloads are logged by the coordinator; only successes arrive here
    for snapshot in subscription {
        println!(
            "generation {}: theme '{}'",
            snapshot.generation(),
            snapshot.theme().name()
        );
    }
    drop(handle);
    Ok(0)
}

