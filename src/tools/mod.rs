//! Tool discovery and execution for the run engine.
//!
//! Tools come from an external tool-execution service. The catalog wraps
//! each one behind a local `execute`, normalizes argument schemas when the
//! route's compat profile asks for it, and caches the result per profile.

mod catalog;
mod service;

pub use catalog::{ToolCatalog, ToolDefinition, ToolSet, MAX_RESULT_CHARS};
pub use service::{NoTools, RemoteTool, ToolService};
