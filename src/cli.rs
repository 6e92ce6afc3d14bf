//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::observability::LogFormat;

/// Timer-driven werewolf session server.
#[derive(Parser, Debug)]
#[command(name = "moonphase", author, version, about)]
pub struct Cli {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "MOONPHASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the snapshot file path from the configuration.
    #[arg(short, long, env = "MOONPHASE_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, default_value = "human")]
    pub log_format: LogFormat,

    /// Color output control.
    #[arg(long, default_value = "auto", env = "MOONPHASE_COLOR")]
    pub color: ColorChoice,
}

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}
