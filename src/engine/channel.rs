//! Model-calling channel: the seam between the run engine and a backend.
//!
//! A channel runs one step. It streams the model's output as [`ModelPart`]s
//! and invokes tool `execute` callbacks itself; the engine only observes the
//! resulting parts.

use crate::error::Result;
use crate::router::ModelRoute;
use crate::tools::ToolSet;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One input message of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
}

/// The outcome of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool_name: String,
    pub output: String,
    pub is_error: bool,
}

/// One entry of the transcript sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Assistant(String),
    /// Assistant turn that requested tools, with any text streamed alongside.
    ToolCalls {
        text: String,
        calls: Vec<ToolCallRecord>,
    },
    ToolResults(Vec<ToolResultRecord>),
}

/// Everything a channel needs for one step.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub route: ModelRoute,
    pub system_prompt: String,
    pub history: Vec<Turn>,
    pub tools: Arc<ToolSet>,
    pub cancel: CancellationToken,
}

/// Typed output of a model stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    TextDelta {
        text: String,
        seq: Option<u64>,
    },
    ToolCall {
        call_id: Option<String>,
        tool_name: String,
        args: Value,
    },
    /// A finished tool execution; the error side carries the failure text.
    ToolResult {
        call_id: Option<String>,
        tool_name: String,
        output: std::result::Result<String, String>,
    },
    Error {
        message: String,
    },
    /// Authoritative final text of the step, possibly empty.
    Finish {
        text: String,
    },
}

pub type PartStream = BoxStream<'static, Result<ModelPart>>;

/// A backend that can run one model step.
#[async_trait]
pub trait ModelChannel: Send + Sync {
    /// Open a streaming call for one step.
    async fn open(&self, request: ChannelRequest) -> Result<PartStream>;
}
