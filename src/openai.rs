//! Model channel speaking the OpenAI chat-completions wire format.
//!
//! Every provider family is reached through an OpenAI-compatible endpoint.
//! Requests are built with the typed `async-openai` builders, passed through
//! the route's compat patches as JSON, and streamed back as [`ModelPart`]s.

use crate::compat::patch_request_by_compat;
use crate::engine::{ChannelRequest, ModelChannel, ModelPart, PartStream, Turn};
use crate::error::{AgoraError, Result};
use crate::router::{env_prefix, ModelRoute};
use crate::tools::{ToolDefinition, ToolSet};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Connect timeout for provider endpoints. Stalled streams are handled by
/// the run engine's idle timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Create a client for a route's endpoint and credential.
pub fn create_client(route: &ModelRoute) -> Result<Client<OpenAIConfig>> {
    let base_url = route.base_url.as_deref().ok_or_else(|| {
        AgoraError::Config(format!(
            "Provider '{}' has no base URL. Set {}_BASE_URL or `providers.{}.base_url`.",
            route.provider_id,
            env_prefix(&route.provider_id),
            route.provider_id
        ))
    })?;

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()?;

    let config = OpenAIConfig::new()
        .with_api_base(base_url.trim_end_matches('/'))
        .with_api_key(route.api_key.clone());

    Ok(Client::with_config(config).with_http_client(http_client))
}

/// The default [`ModelChannel`].
#[derive(Debug, Default, Clone)]
pub struct OpenAiChannel;

impl OpenAiChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelChannel for OpenAiChannel {
    async fn open(&self, request: ChannelRequest) -> Result<PartStream> {
        let client = create_client(&request.route)?;
        let body = build_request(&request)?;

        debug!(
            provider = %request.route.provider_id,
            model = %request.route.model_id,
            messages = body.messages.len(),
            "Opening chat stream"
        );
        let mut upstream = client
            .chat()
            .create_stream(body)
            .await
            .map_err(|e| AgoraError::Model(e.to_string()))?;

        let tools = request.tools;
        let cancel = request.cancel;

        Ok(Box::pin(try_stream! {
            let mut text = String::new();
            let mut seq = 0u64;
            let mut fragments: BTreeMap<u32, CallFragment> = BTreeMap::new();

            while let Some(chunk) = upstream.next().await {
                let chunk = chunk.map_err(|e| AgoraError::Model(e.to_string()))?;
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            seq += 1;
                            text.push_str(&content);
                            yield ModelPart::TextDelta { text: content, seq: Some(seq) };
                        }
                    }
                    for call in choice.delta.tool_calls.unwrap_or_default() {
                        let fragment = fragments.entry(call.index).or_default();
                        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                            fragment.id = Some(id);
                        }
                        if let Some(function) = call.function {
                            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                                if fragment.name.is_empty() {
                                    fragment.name = name;
                                }
                            }
                            if let Some(arguments) = function.arguments {
                                fragment.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }

            let mut running = FuturesUnordered::new();
            for fragment in fragments.into_values() {
                let args = fragment.parsed_args();
                yield ModelPart::ToolCall {
                    call_id: fragment.id.clone(),
                    tool_name: fragment.name.clone(),
                    args: args.clone().unwrap_or(Value::Null),
                };

                let tool = tools.get(&fragment.name).cloned();
                running.push(execute_call(fragment, tool, args, cancel.clone()));
            }
            while let Some(part) = running.next().await {
                yield part;
            }

            yield ModelPart::Finish { text };
        }))
    }
}

/// A tool call being reassembled from streamed fragments.
#[derive(Debug, Default)]
struct CallFragment {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl CallFragment {
    fn parsed_args(&self) -> std::result::Result<Value, String> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
            .map_err(|e| format!("Invalid arguments for '{}': {}", self.name, e))
    }
}

async fn execute_call(
    fragment: CallFragment,
    tool: Option<ToolDefinition>,
    args: std::result::Result<Value, String>,
    cancel: CancellationToken,
) -> ModelPart {
    let output = match (tool, args) {
        (None, _) => Err(format!("Unknown tool '{}'", fragment.name)),
        (Some(_), Err(message)) => Err(message),
        (Some(tool), Ok(args)) => {
            info!(tool = %tool.name, "Calling tool");
            tokio::select! {
                _ = cancel.cancelled() => Err("cancelled".to_string()),
                result = tool.execute(args) => result.map_err(|e| match e {
                    AgoraError::ToolFailed(message) => message,
                    other => other.to_string(),
                }),
            }
        }
    };

    ModelPart::ToolResult {
        call_id: fragment.id,
        tool_name: fragment.name,
        output,
    }
}

/// Build the wire request for one step, with the route's compat patches
/// applied.
pub(crate) fn build_request(request: &ChannelRequest) -> Result<CreateChatCompletionRequest> {
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(request.route.model_id.clone())
        .messages(build_messages(&request.system_prompt, &request.history)?);

    if !request.tools.is_empty() {
        args.tools(build_tools(&request.tools))
            .parallel_tool_calls(true);
    }

    let typed = args.build().map_err(|e| AgoraError::Model(e.to_string()))?;

    let mut body = serde_json::to_value(&typed)?;
    patch_request_by_compat(&request.route.compat, &mut body);
    Ok(serde_json::from_value(body)?)
}

fn build_tools(tools: &ToolSet) -> Vec<ChatCompletionTool> {
    tools
        .values()
        .map(|tool| ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: tool.name.clone(),
                description: Some(tool.description.clone()).filter(|d| !d.is_empty()),
                parameters: Some(tool.args_schema.clone()).filter(|p| !p.is_null()),
                strict: None,
            },
        })
        .collect()
}

fn build_messages(system_prompt: &str, history: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>> {
    let build_err = |e: async_openai::error::OpenAIError| AgoraError::Model(e.to_string());
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

    if !system_prompt.is_empty() {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(build_err)?
                .into(),
        );
    }

    for turn in history {
        match turn {
            Turn::User(content) => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content.as_str())
                    .build()
                    .map_err(build_err)?
                    .into(),
            ),
            Turn::Assistant(content) => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.as_str())
                    .build()
                    .map_err(build_err)?
                    .into(),
            ),
            Turn::ToolCalls { text, calls } => {
                let tool_calls: Vec<ChatCompletionMessageToolCall> = calls
                    .iter()
                    .map(|call| ChatCompletionMessageToolCall {
                        id: call.call_id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: call.tool_name.clone(),
                            arguments: call.args.to_string(),
                        },
                    })
                    .collect();

                let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
                assistant.tool_calls(tool_calls);
                if !text.is_empty() {
                    assistant.content(text.as_str());
                }
                messages.push(assistant.build().map_err(build_err)?.into());
            }
            Turn::ToolResults(results) => {
                for result in results {
                    let content = if result.is_error {
                        format!("Error: {}", result.output)
                    } else {
                        result.output.clone()
                    };
                    messages.push(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(result.call_id.as_str())
                            .content(content)
                            .build()
                            .map_err(build_err)?
                            .into(),
                    );
                }
            }
        }
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderSettings, Settings};
    use crate::engine::{ToolCallRecord, ToolResultRecord};
    use crate::router::ProviderRegistry;
    use crate::tools::{NoTools, RemoteTool, ToolCatalog, ToolService};
    use serde_json::json;
    use std::sync::Arc;

    struct ForumTools;

    #[async_trait]
    impl ToolService for ForumTools {
        async fn list_tools(&self) -> Result<Vec<RemoteTool>> {
            Ok(vec![RemoteTool {
                name: "list_posts".to_string(),
                description: "List recent posts".to_string(),
                input_schema: json!({}),
            }])
        }

        async fn call_tool(&self, _name: &str, _args: Value) -> Result<Value> {
            Ok(json!([]))
        }
    }

    fn route(model: &str, settings: &Settings) -> ModelRoute {
        ProviderRegistry::with_env(
            settings,
            [
                ("OPENAI_API_KEY".to_string(), "sk-openai".to_string()),
                ("OPENROUTER_API_KEY".to_string(), "sk-or".to_string()),
            ],
        )
        .route(Some(model))
        .unwrap()
    }

    async fn request(route: ModelRoute, service: Arc<dyn ToolService>) -> ChannelRequest {
        let tools = ToolCatalog::new(service)
            .tools_for(&route.compat)
            .await
            .unwrap();
        ChannelRequest {
            route,
            system_prompt: "Be brief.".to_string(),
            history: vec![
                Turn::User("latest posts?".to_string()),
                Turn::ToolCalls {
                    text: String::new(),
                    calls: vec![ToolCallRecord {
                        call_id: "call_1".to_string(),
                        tool_name: "list_posts".to_string(),
                        args: json!({}),
                    }],
                },
                Turn::ToolResults(vec![ToolResultRecord {
                    call_id: "call_1".to_string(),
                    tool_name: "list_posts".to_string(),
                    output: "[]".to_string(),
                    is_error: false,
                }]),
            ],
            tools,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_strict_family_keeps_parallel_flag() {
        let req = request(route("openai/gpt-4o", &Settings::default()), Arc::new(ForumTools)).await;
        let body = serde_json::to_value(build_request(&req).unwrap()).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["parallel_tool_calls"], json!(true));
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["parameters"], json!({}));
    }

    #[tokio::test]
    async fn test_compatible_family_is_patched() {
        let req = request(
            route("openrouter/meta-llama/llama-3-70b", &Settings::default()),
            Arc::new(ForumTools),
        )
        .await;
        let body = serde_json::to_value(build_request(&req).unwrap()).unwrap();

        assert!(body.get("parallel_tool_calls").is_none());
        assert_eq!(
            body["tools"][0]["function"]["parameters"],
            json!({"type": "object", "properties": {}})
        );
    }

    #[tokio::test]
    async fn test_no_tools_sends_no_tool_fields() {
        let req = request(route("gpt-4o-mini", &Settings::default()), Arc::new(NoTools)).await;
        let body = serde_json::to_value(build_request(&req).unwrap()).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("parallel_tool_calls").is_none());
    }

    #[test]
    fn test_missing_base_url_names_env_var() {
        let mut settings = Settings::default();
        settings.providers.insert(
            "acme".to_string(),
            ProviderSettings {
                api_key: Some("k".to_string()),
                ..Default::default()
            },
        );
        let route = route("acme/model-x", &settings);
        let err = create_client(&route).unwrap_err();
        assert!(err.to_string().contains("ACME_BASE_URL"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_args_fail_without_calling() {
        let unknown = execute_call(
            CallFragment {
                id: Some("c1".to_string()),
                name: "nope".to_string(),
                arguments: String::new(),
            },
            None,
            Ok(json!({})),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            unknown,
            ModelPart::ToolResult { output: Err(ref m), .. } if m.contains("Unknown tool")
        ));

        let fragment = CallFragment {
            id: None,
            name: "list_posts".to_string(),
            arguments: "{\"limit\": ".to_string(),
        };
        assert!(fragment.parsed_args().is_err());
        assert_eq!(
            CallFragment::default().parsed_args().unwrap(),
            json!({})
        );
    }
}
