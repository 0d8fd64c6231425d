use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PromptKit Arena — declarative multi-provider prompt testing.
#[derive(Debug, Parser)]
#[command(name = "arena", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the (scenario x provider x region) matrix from an arena file.
    Run {
        /// Path to the Arena YAML file.
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
        /// Run only this scenario id.
        #[arg(long)]
        scenario: Option<String>,
        /// Run only this provider id.
        #[arg(long)]
        provider: Option<String>,
        /// Replace every provider with a deterministic mock.
        #[arg(long)]
        mock_provider: bool,
        /// Worker-pool size override.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Comma-separated result formats: json,markdown,junit,html.
        #[arg(long, value_delimiter = ',')]
        format: Vec<String>,
        /// Output directory override.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Parse and validate an arena file without running anything.
    Validate {
        /// Path to the Arena YAML file.
        config: PathBuf,
    },
}

/// Process exit codes, as documented for CI consumers.
pub mod exit {
    /// All runs passed.
    pub const OK: i32 = 0;
    /// One or more assertions failed (or runs errored).
    pub const ASSERTIONS_FAILED: i32 = 1;
    /// Configuration or validation error.
    pub const CONFIG_ERROR: i32 = 2;
    /// Fatal runtime error.
    pub const RUNTIME_ERROR: i32 = 3;
}
