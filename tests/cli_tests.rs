//! Exit codes of the `lumen` subcommands.

use lumen::cli::{Commands, RuntimeOptions, SchemaKind};
use lumen::commands;
use std::fs;
use tempfile::TempDir;

fn options(dir: &TempDir) -> RuntimeOptions {
    RuntimeOptions {
        config_dir: Some(dir.path().to_path_buf()),
        log_level: None,
    }
}

#[test]
fn test_check_valid_and_invalid_config() {
    let dir = TempDir::new().expect("temp dir");
    let check = Commands::Check { each: true };
    assert_eq!(commands::run(check.clone(), &options(&dir)).expect("runs"), 0);

    fs::write(dir.path().join("config.yaml"), "input-info: loud\n").expect("write config");
    assert_eq!(commands::run(check, &options(&dir)).expect("runs"), 1);
}

#[test]
fn test_show_unknown_path_fails() {
    let dir = TempDir::new().expect("temp dir");
    let show = |path: &str| Commands::Show {
        path: Some(path.to_string()),
        json: true,
    };
    assert_eq!(commands::run(show("watch"), &options(&dir)).expect("runs"), 0);
    assert_eq!(commands::run(show("no.such.key"), &options(&dir)).expect("runs"), 1);
}

#[test]
fn test_theme_commands() {
    let dir = TempDir::new().expect("temp dir");
    let theme = |name: &str| Commands::Theme {
        name: Some(name.to_string()),
    };
    assert_eq!(commands::run(theme("nord"), &options(&dir)).expect("runs"), 0);
    assert_eq!(commands::run(theme("ghost"), &options(&dir)).expect("runs"), 1);
    assert_eq!(commands::run(Commands::Themes, &options(&dir)).expect("runs"), 0);
}

#[test]
fn test_schema_command() {
    let dir = TempDir::new().expect("temp dir");
    let schema = Commands::Schema {
        kind: SchemaKind::Config,
    };
    assert_eq!(commands::run(schema, &options(&dir)).expect("runs"), 0);
}
