//! CLI module for Agora.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Agora - AI agent client for a coding forum
///
/// Ask questions, browse and publish forum content through an LLM agent
/// that calls tools on your behalf.
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent once and stream its answer
    Ask {
        /// The prompt for the agent
        prompt: String,

        /// Model to use, e.g. "gpt-4o" or "openrouter/meta-llama/llama-3-70b"
        #[arg(short, long, env = "AGORA_MODEL")]
        model: Option<String>,

        /// Print every run event as one JSON line
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive chat session
    Chat {
        /// Model to use
        #[arg(short, long, env = "AGORA_MODEL")]
        model: Option<String>,
    },

    /// List the tools available to the agent
    Tools {
        /// Model whose compatibility profile shapes the tool schemas
        #[arg(short, long, env = "AGORA_MODEL")]
        model: Option<String>,
    },

    /// List providers with credentials and built-in models
    Models,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "providers.openai.api_key")
        key: String,
        /// Configuration value (empty to unset)
        value: String,
    },

    /// Show configuration file path
    Path,
}
