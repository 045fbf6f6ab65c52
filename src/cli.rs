//! Command-line interface for lumen.
//!
//! This module handles CLI argument parsing. The subcommands themselves live
//! in [`crate::commands`].

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lumen - inspect, validate and watch lumen configuration and themes
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default: $LUMEN_CONFIG_DIR or ~/.config/lumen)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Log level for diagnostics on stderr (overrides LUMEN_LOG)
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Load the full configuration and report every problem found (default)
    Check {
        /// Also check each config file and theme on its own
        #[arg(long)]
        each: bool,
    },

    /// Print the merged configuration or a part of it
    Show {
        /// Dotted path of the part to print (e.g. fields.predefined.level)
        path: Option<String>,

        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Print a resolved theme (default: the selected one)
    Theme {
        /// Theme name
        name: Option<String>,
    },

    /// List available themes
    Themes,

    /// Print a bundled schema
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },

    /// Load the configuration, then reload whenever it changes
    Watch,
}

/// Bundled schema documents.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Config,
    Theme,
}

/// `--log-level` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Options shared by every subcommand
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    /// Explicit config directory
    pub config_dir: Option<PathBuf>,
    /// Log level from the command line
    pub log_level: Option<log::LevelFilter>,
}

/// Result of CLI processing
pub enum CliResult {
    /// Run `command` with the given options
    Continue(Commands, RuntimeOptions),
    /// Exit with the given code
    Exit(i32),
}

/// Process CLI arguments
pub fn process_cli() -> CliResult {
    match Cli::try_parse() {
        Ok(cli) => from_cli(cli),
        Err(e) => {
            // Prints help/version to stdout and usage errors to stderr
            let _ = e.print();
            CliResult::Exit(e.exit_code())
        }
    }
}

fn from_cli(cli: Cli) -> CliResult {
    let options = RuntimeOptions {
        config_dir: cli.config_dir,
        log_level: cli.log_level.map(LogLevel::to_level_filter),
    };
    let command = cli.command.unwrap_or(Commands::Check { each: false });
    CliResult::Continue(command, options)
}
