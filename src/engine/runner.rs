//! The bounded, streaming model/tool loop.

use super::channel::{
    ChannelRequest, Message, ModelChannel, ModelPart, PartStream, Role, ToolCallRecord,
    ToolResultRecord, Turn,
};
use super::events::{EventKind, EventSequencer, StreamEvent};
use crate::config::{AgentSettings, Settings};
use crate::error::{AgoraError, Result};
use crate::mcp::McpToolService;
use crate::openai::OpenAiChannel;
use crate::router::{ModelRoute, ProviderRegistry};
use crate::stream::StreamAssembler;
use crate::tools::{NoTools, ToolCatalog, ToolService, ToolSet};
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default system prompt for the agent.
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Agora, an assistant for a coding forum.

You can read and publish forum content and inspect the user's local coding sessions through the tools you are given.
Think about what information you need, call tools to get it, then answer.

Guidelines:
- Prefer reading existing posts before drafting new ones
- Never publish, vote or comment without the user asking for it
- Quote post titles and links when you reference forum content
- Keep answers concise and formatted in Markdown"#;

/// Lazily produced, single-pass sequence of run events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Per-run timeouts. `None` disables a timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub tool_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn from_settings(agent: &AgentSettings) -> Self {
        let millis = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Self {
            tool_timeout: millis(agent.tool_timeout_ms),
            idle_timeout: millis(agent.idle_timeout_ms),
        }
    }
}

/// Drives runs: routes the model, attaches tools and streams events.
pub struct RunEngine {
    registry: ProviderRegistry,
    catalog: Arc<ToolCatalog>,
    channel: Arc<dyn ModelChannel>,
    system_prompt: String,
    max_steps: usize,
    defaults: RunOptions,
}

impl RunEngine {
    /// Create an engine from its collaborators.
    pub fn new(
        registry: ProviderRegistry,
        catalog: Arc<ToolCatalog>,
        channel: Arc<dyn ModelChannel>,
    ) -> Self {
        let agent = AgentSettings::default();
        Self {
            registry,
            catalog,
            channel,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: agent.max_steps,
            defaults: RunOptions::from_settings(&agent),
        }
    }

    /// Create an engine wired to the configured providers, tool server and
    /// the OpenAI-wire model channel.
    pub fn from_settings(settings: &Settings) -> Self {
        let service: Arc<dyn ToolService> = if settings.tools.is_enabled() {
            Arc::new(McpToolService::new(settings.tools.clone()))
        } else {
            Arc::new(NoTools)
        };

        let mut engine = Self::new(
            ProviderRegistry::from_settings(settings),
            Arc::new(ToolCatalog::new(service)),
            Arc::new(OpenAiChannel::new()),
        )
        .with_max_steps(settings.agent.max_steps)
        .with_options(RunOptions::from_settings(&settings.agent));

        if let Some(prompt) = &settings.agent.system_prompt {
            engine = engine.with_system_prompt(prompt);
        }
        engine
    }

    /// Set a custom system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    /// Set the timeouts used by [`RunEngine::generate`].
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn options(&self) -> RunOptions {
        self.defaults
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Start a run.
    ///
    /// Routing and tool discovery failures are returned before any event is
    /// produced. Once the stream exists it always ends with `run-finish`.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        options: RunOptions,
        model: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let route = self.registry.route(model)?;
        let tools = self.catalog.tools_for(&route.compat).await?;

        let mut system_prompt = self.system_prompt.clone();
        let mut history = Vec::new();
        for message in messages {
            match message.role {
                Role::System => {
                    system_prompt.push_str("\n\n");
                    system_prompt.push_str(&message.content);
                }
                Role::User => history.push(Turn::User(message.content)),
                Role::Assistant => history.push(Turn::Assistant(message.content)),
            }
        }

        let run = RunContext {
            run_id: Uuid::new_v4().to_string(),
            route,
            tools,
            channel: Arc::clone(&self.channel),
            system_prompt,
            history,
            options,
            max_steps: self.max_steps,
            cancel,
        };
        info!(run_id = %run.run_id, model = %run.route.label(), tools = run.tools.len(), "Starting run");

        Ok(Box::pin(drive(run)))
    }

    /// Run a single prompt to completion and return the final text.
    pub async fn generate(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        let mut events = self
            .run(
                vec![Message::user(prompt)],
                self.defaults,
                model,
                CancellationToken::new(),
            )
            .await?;

        let mut text = String::new();
        while let Some(event) = events.next().await {
            if let EventKind::RunFinish { text: final_text, .. } = event.kind {
                text = final_text;
            }
        }
        Ok(text)
    }

    /// Discover (or reuse) the tool catalog for a model's route.
    pub async fn tools(&self, model: Option<&str>) -> Result<Arc<ToolSet>> {
        let route = self.registry.route(model)?;
        self.catalog.tools_for(&route.compat).await
    }

    /// Forget discovered tools, e.g. after reconnecting the tool server.
    pub fn clear_tool_cache(&self) {
        self.catalog.clear();
    }
}

struct RunContext {
    run_id: String,
    route: ModelRoute,
    tools: Arc<ToolSet>,
    channel: Arc<dyn ModelChannel>,
    system_prompt: String,
    history: Vec<Turn>,
    options: RunOptions,
    max_steps: usize,
    cancel: CancellationToken,
}

/// What woke the step loop up.
enum Wake {
    Part(ModelPart),
    StreamFailed(AgoraError),
    StreamEnded,
    Cancelled,
    Idle,
    ToolDeadline,
}

fn drive(run: RunContext) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let RunContext {
            run_id,
            route,
            tools,
            channel,
            system_prompt,
            mut history,
            options,
            max_steps,
            cancel,
        } = run;

        let mut events = EventSequencer::new(run_id.clone());
        yield events.next(EventKind::RunStart {
            provider: route.provider_id.clone(),
            model: route.model_id.clone(),
        });

        let mut final_text = String::new();
        let mut tools_used: Vec<String> = Vec::new();
        let mut aborted = false;
        let mut failed = false;
        let mut steps = 0;

        while steps < max_steps {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }
            steps += 1;
            debug!(run_id = %run_id, step = steps, "Starting step");

            let request = ChannelRequest {
                route: route.clone(),
                system_prompt: system_prompt.clone(),
                history: history.clone(),
                tools: Arc::clone(&tools),
                cancel: cancel.child_token(),
            };

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = channel.open(request) => Some(opened),
            };
            let mut parts: PartStream = match opened {
                None => {
                    aborted = true;
                    break;
                }
                Some(Ok(parts)) => parts,
                Some(Err(e)) => {
                    warn!(run_id = %run_id, error = %e, "Model call failed to start");
                    yield events.next(EventKind::error(e.to_string()));
                    failed = true;
                    break;
                }
            };

            let mut step = StepState::default();
            loop {
                let idle = if step.has_pending() { None } else { options.idle_timeout };
                let deadline = step.next_deadline(options.tool_timeout);

                let wake = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Wake::Cancelled,
                    part = parts.next() => match part {
                        Some(Ok(part)) => Wake::Part(part),
                        Some(Err(e)) => Wake::StreamFailed(e),
                        None => Wake::StreamEnded,
                    },
                    _ = sleep_for(idle) => Wake::Idle,
                    _ = sleep_until(deadline) => Wake::ToolDeadline,
                };

                match wake {
                    Wake::Part(part) => {
                        for kind in step.apply(part) {
                            yield events.next(kind);
                        }
                    }
                    Wake::StreamEnded => break,
                    Wake::StreamFailed(e) => {
                        warn!(run_id = %run_id, error = %e, "Model stream failed");
                        yield events.next(EventKind::error(e.to_string()));
                        failed = true;
                        break;
                    }
                    Wake::Cancelled => {
                        info!(run_id = %run_id, step = steps, "Run cancelled");
                        aborted = true;
                        break;
                    }
                    Wake::Idle => {
                        let idle_ms = options.idle_timeout.unwrap_or_default().as_millis() as u64;
                        warn!(run_id = %run_id, idle_ms, "Model stream went idle");
                        yield events.next(EventKind::error(format!(
                            "Model stream idle for {}ms; step aborted",
                            idle_ms
                        )));
                        aborted = true;
                        break;
                    }
                    Wake::ToolDeadline => {
                        let timeout = options.tool_timeout.unwrap_or_default();
                        for kind in step.expire(Instant::now(), timeout) {
                            yield events.next(kind);
                        }
                        // The channel is blocked on the expired calls.
                        if !step.has_pending() {
                            break;
                        }
                    }
                }
            }
            drop(parts);

            if !aborted && !failed {
                for kind in step.abandon_pending() {
                    yield events.next(kind);
                }
            }

            let (text, calls, results) = step.finish();
            append_text(&mut final_text, &text);

            if calls.is_empty() || aborted || failed {
                break;
            }
            tools_used.extend(calls.iter().map(|c| c.tool_name.clone()));
            history.push(Turn::ToolCalls { text, calls });
            history.push(Turn::ToolResults(results));
        }

        if final_text.trim().is_empty() && !aborted && !failed {
            final_text = fallback_summary(&tools_used);
        }

        info!(run_id = %run_id, steps, aborted, "Run finished");
        yield events.next(EventKind::RunFinish {
            text: final_text,
            aborted,
            steps,
        });
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn append_text(total: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if !total.is_empty() {
        total.push_str("\n\n");
    }
    total.push_str(text);
}

fn fallback_summary(tools_used: &[String]) -> String {
    if tools_used.is_empty() {
        return "The model returned no text.".to_string();
    }
    let mut names: Vec<&str> = Vec::new();
    for name in tools_used {
        if !names.contains(&name.as_str()) {
            names.push(name);
        }
    }
    format!(
        "Completed {} tool call(s): {}.",
        tools_used.len(),
        names.join(", ")
    )
}

/// A tool call announced with `tool-start` and not yet resolved.
#[derive(Debug, Clone)]
struct PendingToolCall {
    call_id: String,
    tool_name: String,
    started: Instant,
}

/// Bookkeeping for one step.
#[derive(Debug, Default)]
struct StepState {
    assembler: StreamAssembler,
    pending: HashMap<String, VecDeque<PendingToolCall>>,
    timed_out: HashSet<String>,
    /// Per tool name, timed-out calls whose late result is still owed.
    tombstones: HashMap<String, usize>,
    calls: Vec<ToolCallRecord>,
    results: Vec<ToolResultRecord>,
}

impl StepState {
    fn has_pending(&self) -> bool {
        self.pending.values().any(|queue| !queue.is_empty())
    }

    fn next_deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        let timeout = timeout?;
        self.pending
            .values()
            .filter_map(|queue| queue.front())
            .map(|call| call.started + timeout)
            .min()
    }

    fn apply(&mut self, part: ModelPart) -> Vec<EventKind> {
        match part {
            ModelPart::TextDelta { text, seq } => {
                let before = self.assembler.text().len();
                self.assembler.push_delta(&text, seq);
                if self.assembler.text().len() > before {
                    vec![EventKind::TextDelta { text }]
                } else {
                    Vec::new()
                }
            }
            ModelPart::ToolCall {
                call_id,
                tool_name,
                args,
            } => {
                let call_id = call_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                self.pending
                    .entry(tool_name.clone())
                    .or_default()
                    .push_back(PendingToolCall {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        started: Instant::now(),
                    });
                self.calls.push(ToolCallRecord {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    args: args.clone(),
                });
                vec![EventKind::ToolStart {
                    call_id,
                    tool_name,
                    args,
                }]
            }
            ModelPart::ToolResult {
                call_id,
                tool_name,
                output,
            } => {
                if let Some(id) = call_id.as_ref().filter(|id| self.timed_out.contains(*id)) {
                    self.timed_out.remove(id);
                    self.bury(&tool_name);
                    debug!(tool = %tool_name, "Discarding late result of timed out call");
                    return Vec::new();
                }
                let matches_pending = call_id.as_ref().is_some_and(|id| {
                    self.pending
                        .get(&tool_name)
                        .is_some_and(|queue| queue.iter().any(|call| &call.call_id == id))
                });
                if !matches_pending && self.bury(&tool_name) {
                    debug!(tool = %tool_name, "Discarding late result of timed out call");
                    return Vec::new();
                }
                let Some(call) = self
                    .pending
                    .get_mut(&tool_name)
                    .and_then(VecDeque::pop_front)
                else {
                    debug!(tool = %tool_name, "Discarding result with no pending call");
                    return Vec::new();
                };
                vec![self.resolve(call, output)]
            }
            ModelPart::Error { message } => vec![EventKind::error(message)],
            ModelPart::Finish { text } => {
                if self.assembler.is_finished() {
                    debug!("Ignoring repeated finish part");
                } else {
                    self.assembler.push_final(&text);
                }
                Vec::new()
            }
        }
    }

    fn resolve(
        &mut self,
        call: PendingToolCall,
        output: std::result::Result<String, String>,
    ) -> EventKind {
        let (output, is_error) = match output {
            Ok(output) => (output, false),
            Err(message) => (message, true),
        };
        self.results.push(ToolResultRecord {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            output: output.clone(),
            is_error,
        });

        if is_error {
            EventKind::Error {
                message: format!("Tool '{}' failed: {}", call.tool_name, output),
                call_id: Some(call.call_id),
            }
        } else {
            EventKind::ToolResult {
                call_id: call.call_id,
                tool_name: call.tool_name,
                output,
            }
        }
    }

    /// Consume one tombstone for `tool_name`, if any is left.
    fn bury(&mut self, tool_name: &str) -> bool {
        match self.tombstones.get_mut(tool_name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Resolve every pending call whose deadline has passed as failed.
    fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<EventKind> {
        let mut expired = Vec::new();
        for queue in self.pending.values_mut() {
            while queue.front().is_some_and(|call| call.started + timeout <= now) {
                if let Some(call) = queue.pop_front() {
                    expired.push(call);
                }
            }
        }

        expired
            .into_iter()
            .map(|call| {
                warn!(tool = %call.tool_name, call_id = %call.call_id, "Tool call timed out");
                self.timed_out.insert(call.call_id.clone());
                *self.tombstones.entry(call.tool_name.clone()).or_default() += 1;
                let message = format!("timed out after {}ms", timeout.as_millis());
                self.resolve(call, Err(message))
            })
            .collect()
    }

    /// Resolve calls the channel never reported a result for.
    fn abandon_pending(&mut self) -> Vec<EventKind> {
        let abandoned: Vec<PendingToolCall> = self
            .pending
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect();
        abandoned
            .into_iter()
            .map(|call| self.resolve(call, Err("tool call ended without a result".to_string())))
            .collect()
    }

    fn finish(self) -> (String, Vec<ToolCallRecord>, Vec<ToolResultRecord>) {
        (self.assembler.into_text(), self.calls, self.results)
    }
}
