// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use niffler_config::AgentMode;

#[derive(Parser, Debug)]
#[command(
    name = "niffler",
    about = "An interactive AI coding assistant",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional initial prompt, submitted before the interactive loop starts
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Starting agent mode (defaults to the value in config)
    #[arg(long, short = 'm', value_enum)]
    pub mode: Option<AgentMode>,

    /// Model nickname to use, e.g. a key under `providers` in config
    #[arg(long, short = 'M', env = "NIFFLER_MODEL")]
    pub model: Option<String>,

    /// Path to a config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Path to the persisted conversation database (overrides ~/.niffler/niffler.db)
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace); NIFFLER_LOG_LEVEL overrides this
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit
    ShowConfig,
    /// Generate a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "niffler", &mut std::io::stdout());
}
