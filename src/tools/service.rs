//! Boundary to the external tool-execution service.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A tool as advertised by the service, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Trait for services that can list and invoke tools.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Fetch every tool the service offers.
    async fn list_tools(&self) -> Result<Vec<RemoteTool>>;

    /// Invoke a tool. Remote failures are returned as errors carrying the
    /// remote error text.
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value>;

    /// Drop any open connection so the next call reconnects.
    fn reset(&self) {}
}

/// Service used when no tool server is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolService for NoTools {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _args: Value) -> Result<Value> {
        Err(crate::error::AgoraError::ToolFailed(format!(
            "No tool server configured (requested '{}')",
            name
        )))
    }
}
