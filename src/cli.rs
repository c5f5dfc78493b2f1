//! clap-based command-line interface.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`] (generate, demo)
//! and global flags (--cuts, --style, --max-retries, --verbose).

use clap::{Parser, Subcommand};

/// fourcut — turns a diary entry into an illustrated four-cut strip.
#[derive(Debug, Parser)]
#[command(name = "fourcut", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Number of cuts in the strip.
    #[arg(long, global = true)]
    pub cuts: Option<u32>,

    /// Style guide applied to every panel.
    #[arg(long, global = true)]
    pub style: Option<String>,

    /// Repair budget per failing cut.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a comic strip from a diary entry.
    Generate {
        /// The diary text.
        diary: Option<String>,

        /// Path to a text file containing the diary entry.
        #[arg(long)]
        file: Option<String>,

        /// Path to a portrait image anchoring the character's look.
        #[arg(long)]
        reference: Option<String>,
    },

    /// Run the pipeline against the built-in offline backend.
    Demo,
}
