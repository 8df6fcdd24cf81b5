//! Cached, schema-normalized tool catalog.

use super::service::ToolService;
use crate::compat::{normalize_schema, CompatProfile};
use crate::error::{AgoraError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Tool results longer than this many characters are truncated.
pub const MAX_RESULT_CHARS: usize = 8000;

const TRUNCATION_MARKER: &str = "\n\n[output truncated]";

/// Tools exposed to the model, keyed by name.
pub type ToolSet = BTreeMap<String, ToolDefinition>;

/// A callable tool backed by the tool service.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
    service: Arc<dyn ToolService>,
}

impl ToolDefinition {
    /// Invoke the tool and return its output as bounded text.
    pub async fn execute(&self, args: Value) -> Result<String> {
        let output = self.service.call_tool(&self.name, strip_nulls(args)).await?;
        let text = match output {
            Value::String(text) => text,
            other => serde_json::to_string(&other)?,
        };
        Ok(truncate_output(text))
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args_schema", &self.args_schema)
            .finish()
    }
}

fn strip_nulls(args: Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn truncate_output(text: String) -> String {
    match text.char_indices().nth(MAX_RESULT_CHARS) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text,
    }
}

/// Tool catalog shared across runs, cached per compat cache key.
///
/// Concurrent callers for the same key share one in-flight discovery.
pub struct ToolCatalog {
    service: Arc<dyn ToolService>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Arc<ToolSet>>>>>,
}

impl ToolCatalog {
    pub fn new(service: Arc<dyn ToolService>) -> Self {
        Self {
            service,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the tools for a profile, discovering them on first use.
    pub async fn tools_for(&self, profile: &CompatProfile) -> Result<Arc<ToolSet>> {
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(profile.cache_key.clone()).or_default())
        };

        let tools = cell.get_or_try_init(|| self.discover(profile)).await?;
        Ok(Arc::clone(tools))
    }

    /// Drop every cached catalog and the service connection; the next
    /// request reconnects and rediscovers.
    pub fn clear(&self) {
        self.service.reset();
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Tool cache cleared");
    }

    async fn discover(&self, profile: &CompatProfile) -> Result<Arc<ToolSet>> {
        let remote = self
            .service
            .list_tools()
            .await
            .map_err(|e| AgoraError::ToolDiscovery(e.to_string()))?;

        let tools: ToolSet = remote
            .into_iter()
            .map(|tool| {
                let mut args_schema = tool.input_schema;
                if profile.normalize_tool_schema {
                    normalize_schema(&mut args_schema);
                }
                let definition = ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description,
                    args_schema,
                    service: Arc::clone(&self.service),
                };
                (tool.name, definition)
            })
            .collect();

        info!(count = tools.len(), cache_key = %profile.cache_key, "Discovered tools");
        Ok(Arc::new(tools))
    }
}
