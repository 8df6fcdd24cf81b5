//! MCP (Model Context Protocol) client for Agora.
//!
//! Bridges the tool catalog to an external tool-execution server speaking
//! JSON-RPC 2.0 over stdio.

mod client;
mod protocol;

pub use client::McpToolService;
