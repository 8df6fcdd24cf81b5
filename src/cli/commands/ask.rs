//! Ask command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::engine::{EventKind, EventStream, Message, RunEngine, StreamEvent};
use anyhow::Result;
use futures::StreamExt;
use indicatif::ProgressBar;
use std::io::Write;
use tokio_util::sync::CancellationToken;

/// Run the ask command.
pub async fn run_ask(prompt: &str, model: Option<String>, json: bool, settings: Settings) -> Result<()> {
    let engine = RunEngine::from_settings(&settings);
    let messages = vec![Message::user(prompt)];

    let outcome = stream_run(&engine, messages, model.as_deref(), json).await?;
    if outcome.aborted {
        Output::warning("Run aborted.");
    }
    Ok(())
}

/// Final state of a streamed run.
pub(super) struct RunOutcome {
    pub text: String,
    pub aborted: bool,
}

/// Start a run, render its events and return the final text.
///
/// Ctrl-C cancels the run; the stream still ends with `run-finish`.
pub(super) async fn stream_run(
    engine: &RunEngine,
    messages: Vec<Message>,
    model: Option<&str>,
    json: bool,
) -> Result<RunOutcome> {
    let cancel = CancellationToken::new();
    let spinner = (!json).then(|| Output::spinner("Thinking..."));

    let events = match engine.run(messages, engine.options(), model, cancel.clone()).await {
        Ok(events) => events,
        Err(e) => {
            if let Some(spinner) = &spinner {
                spinner.finish_and_clear();
            }
            return Err(e.into());
        }
    };

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = if json {
        print_json(events).await
    } else {
        EventPrinter::new(spinner).print(events).await
    };
    ctrl_c.abort();
    outcome
}

async fn print_json(mut events: EventStream) -> Result<RunOutcome> {
    let mut outcome = RunOutcome {
        text: String::new(),
        aborted: false,
    };
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let EventKind::RunFinish { text, aborted, .. } = event.kind {
            outcome = RunOutcome { text, aborted };
        }
    }
    Ok(outcome)
}

/// Renders events for a terminal: text to stdout, activity to stderr.
struct EventPrinter {
    spinner: Option<ProgressBar>,
    streamed: bool,
    mid_line: bool,
}

impl EventPrinter {
    fn new(spinner: Option<ProgressBar>) -> Self {
        Self {
            spinner,
            streamed: false,
            mid_line: false,
        }
    }

    async fn print(mut self, mut events: EventStream) -> Result<RunOutcome> {
        let mut outcome = RunOutcome {
            text: String::new(),
            aborted: false,
        };
        while let Some(event) = events.next().await {
            if let Some(finished) = self.render(event)? {
                outcome = finished;
            }
        }
        Ok(outcome)
    }

    fn render(&mut self, event: StreamEvent) -> Result<Option<RunOutcome>> {
        match event.kind {
            EventKind::RunStart { provider, model } => {
                if let Some(spinner) = &self.spinner {
                    spinner.set_message(format!("Thinking ({}/{})...", provider, model));
                }
            }
            EventKind::TextDelta { text } => {
                self.clear_spinner();
                self.streamed = true;
                self.mid_line = true;
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            EventKind::ToolStart {
                tool_name, args, ..
            } => {
                self.break_line();
                Output::tool_start(&tool_name, &args);
            }
            EventKind::ToolResult {
                tool_name, output, ..
            } => Output::tool_done(&tool_name, &output),
            EventKind::Error { message, .. } => {
                self.break_line();
                Output::tool_failed(&message);
            }
            EventKind::RunFinish { text, aborted, .. } => {
                self.clear_spinner();
                if !self.streamed {
                    print!("{}", text);
                }
                println!();
                return Ok(Some(RunOutcome { text, aborted }));
            }
        }
        Ok(None)
    }

    fn clear_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// End a partially streamed line before writing activity to stderr.
    fn break_line(&mut self) {
        self.clear_spinner();
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}
