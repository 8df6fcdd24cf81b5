//! MCP client over the stdio of a spawned server process.
//!
//! One long-lived connection is established lazily on first use and shared
//! by every call. Responses are matched to requests by JSON-RPC id through a
//! background reader task.

use super::protocol::*;
use crate::config::{Settings, ToolServerSettings};
use crate::error::{AgoraError, Result};
use crate::tools::{RemoteTool, ToolService};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "agora";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// An initialized connection to one MCP server.
struct McpConnection {
    _child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    next_id: AtomicU64,
    pending: PendingMap,
    reader: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl McpConnection {
    async fn spawn(settings: &ToolServerSettings) -> Result<Self> {
        info!(command = %settings.command, "Starting tool server");

        let mut child = Command::new(Settings::expand_path(&settings.command))
            .args(&settings.args)
            .envs(&settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgoraError::ToolTransport(format!(
                    "Failed to start tool server '{}': {}",
                    settings.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgoraError::ToolTransport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgoraError::ToolTransport("Failed to capture stdout".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(stdout, Arc::clone(&pending), Arc::clone(&closed));

        let connection = Self {
            _child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            next_id: AtomicU64::new(1),
            pending,
            reader,
            closed,
            request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
        };
        connection.initialize().await?;
        Ok(connection)
    }

    async fn initialize(&self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        };
        let result = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        self.notify("notifications/initialized").await?;

        if let Some(server) = init.server_info {
            info!(
                server = %server.name,
                version = %server.version,
                protocol = %init.protocol_version,
                "Tool server initialized"
            );
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_line(&self, line: String) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            self.closed.store(true, Ordering::SeqCst);
            return Err(AgoraError::ToolTransport(format!(
                "Failed to write to tool server: {}",
                e
            )));
        }
        Ok(())
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.write_line(line).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        if let Err(e) = self.write_line(line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(AgoraError::ToolTransport(
                    "Tool server closed the connection".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(method, "Tool server request timed out");
                return Err(AgoraError::ToolTransport(format!(
                    "{} timed out after {:?}",
                    method, self.request_timeout
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(AgoraError::ToolFailed(format!(
                "{} (code: {})",
                error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| AgoraError::ToolTransport(format!("{}: missing result", method)))
    }
}

impl Drop for McpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn spawn_reader(stdout: ChildStdout, pending: PendingMap, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let response: JsonRpcResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable tool server output");
                    continue;
                }
            };
            // Server-initiated requests and notifications carry no numeric id.
            let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
                continue;
            };
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(id, "Response for unknown request"),
            }
        }

        debug!("Tool server stdout closed");
        closed.store(true, Ordering::SeqCst);
        pending.lock().await.clear();
    })
}

/// Tool service backed by an MCP server.
///
/// A server that exits is respawned on the next call.
pub struct McpToolService {
    settings: ToolServerSettings,
    current: std::sync::Mutex<Option<Arc<McpConnection>>>,
    connecting: Mutex<()>,
}

impl McpToolService {
    pub fn new(settings: ToolServerSettings) -> Self {
        Self {
            settings,
            current: std::sync::Mutex::new(None),
            connecting: Mutex::new(()),
        }
    }

    fn live_connection(&self) -> Option<Arc<McpConnection>> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|conn| conn.is_closed()) {
            info!("Tool server connection closed; will reconnect");
            *current = None;
        }
        current.clone()
    }

    async fn connection(&self) -> Result<Arc<McpConnection>> {
        if let Some(connection) = self.live_connection() {
            return Ok(connection);
        }

        let _guard = self.connecting.lock().await;
        if let Some(connection) = self.live_connection() {
            return Ok(connection);
        }
        let connection = Arc::new(McpConnection::spawn(&self.settings).await?);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&connection));
        Ok(connection)
    }
}

#[async_trait]
impl ToolService for McpToolService {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
        let connection = self.connection().await?;
        let mut tools = Vec::new();
        let mut cursor = None;

        loop {
            let params = serde_json::to_value(ToolsListParams { cursor })?;
            let result = connection.request("tools/list", Some(params)).await?;
            let page: ToolsListResult = serde_json::from_value(result)?;

            tools.extend(page.tools.into_iter().map(|tool| RemoteTool {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(count = tools.len(), "Listed tools");
        Ok(tools)
    }

    fn reset(&self) {
        if self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Dropped tool server connection");
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        let connection = self.connection().await?;
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments: args,
        })?;
        let result = connection.request("tools/call", Some(params)).await?;
        let call: ToolCallResult = serde_json::from_value(result)?;

        if call.is_error.unwrap_or(false) {
            return Err(AgoraError::ToolFailed(call.text()));
        }
        match call.structured_content {
            Some(structured) if call.content.is_empty() => Ok(structured),
            _ => Ok(Value::String(call.text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::Path;

    /// A line-oriented MCP server in POSIX sh. Every spawn appends a line to
    /// `$AGORA_FAKE_LOG`.
    const FAKE_SERVER: &str = r#"
echo spawned >> "$AGORA_FAKE_LOG"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake-forum","version":"0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*'"cursor":"page-2"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"get_post","description":"Fetch one post","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"list_posts","inputSchema":{}}],"nextCursor":"page-2"}}\n' "$id" ;;
    *'"name":"vote"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"post is locked"}],"isError":true}}\n' "$id" ;;
    *'"name":"delete_post"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"unknown tool delete_post"}}\n' "$id" ;;
    *'"name":"crash"'*)
      exit 0 ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"3 posts"}]}}\n' "$id" ;;
  esac
done
"#;

    fn fake_service(log: &Path) -> McpToolService {
        let mut env = BTreeMap::new();
        env.insert(
            "AGORA_FAKE_LOG".to_string(),
            log.to_string_lossy().into_owned(),
        );
        McpToolService::new(ToolServerSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), FAKE_SERVER.to_string()],
            env,
            request_timeout_secs: 10,
        })
    }

    fn spawn_count(log: &Path) -> usize {
        std::fs::read_to_string(log)
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_connection_is_shared_and_pages_are_followed() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let service = fake_service(&log);

        let tools = service.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["list_posts", "get_post"]);
        assert_eq!(tools[0].description, "");
        assert_eq!(tools[1].input_schema, json!({"type": "object"}));

        let output = service
            .call_tool("list_posts", json!({"limit": 3}))
            .await
            .unwrap();
        assert_eq!(output, Value::String("3 posts".to_string()));
        service.call_tool("list_posts", json!({})).await.unwrap();

        assert_eq!(spawn_count(&log), 1);
    }

    #[tokio::test]
    async fn test_remote_errors_carry_remote_text() {
        let dir = tempfile::tempdir().unwrap();
        let service = fake_service(&dir.path().join("spawns.log"));

        let err = service.call_tool("vote", json!({"post": 1})).await.unwrap_err();
        assert!(matches!(err, AgoraError::ToolFailed(ref m) if m == "post is locked"));

        let err = service.call_tool("delete_post", json!({})).await.unwrap_err();
        assert!(matches!(err, AgoraError::ToolFailed(ref m) if m.contains("unknown tool delete_post")));
    }

    #[tokio::test]
    async fn test_exited_server_is_respawned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let service = fake_service(&log);

        service.list_tools().await.unwrap();
        let err = service.call_tool("crash", json!({})).await.unwrap_err();
        assert!(matches!(err, AgoraError::ToolTransport(_)));

        assert_eq!(service.list_tools().await.unwrap().len(), 2);
        assert_eq!(spawn_count(&log), 2);
    }

    #[tokio::test]
    async fn test_reset_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let service = fake_service(&log);

        service.list_tools().await.unwrap();
        service.reset();
        service.list_tools().await.unwrap();
        assert_eq!(spawn_count(&log), 2);
    }

    #[tokio::test]
    async fn test_missing_server_binary_is_transport_error() {
        let service = McpToolService::new(ToolServerSettings {
            command: "agora-test-no-such-binary".to_string(),
            ..Default::default()
        });
        let err = service.list_tools().await.unwrap_err();
        assert!(matches!(err, AgoraError::ToolTransport(_)));
        assert!(err.to_string().contains("agora-test-no-such-binary"));
    }
}
