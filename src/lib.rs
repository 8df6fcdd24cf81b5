//! Agora - AI agent client for a coding forum
//!
//! A CLI agent that talks to several LLM providers and drives a bounded,
//! streaming tool-calling loop against tools served by an external
//! tool-execution service.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration management
//! - `compat` - Per-provider request compatibility profiles
//! - `router` - Model identifier to provider route resolution
//! - `tools` - Cached tool catalog over a tool service
//! - `mcp` - JSON-RPC stdio client for the tool service
//! - `stream` - Streamed text reconciliation
//! - `engine` - The run engine and its event protocol
//! - `openai` - OpenAI-wire model channel
//!
//! # Example
//!
//! ```rust,no_run
//! use agora::config::Settings;
//! use agora::engine::RunEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let engine = RunEngine::from_settings(&settings);
//!
//!     let answer = engine
//!         .generate("Summarize the newest posts", Some("openai/gpt-4o"))
//!         .await?;
//!     println!("{}", answer);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod compat;
pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod openai;
pub mod router;
pub mod stream;
pub mod tools;

pub use error::{AgoraError, Result};
