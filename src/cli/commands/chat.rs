//! Interactive chat command.

use super::ask::stream_run;
use crate::cli::Output;
use crate::config::Settings;
use crate::engine::{Message, Role, RunEngine};
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Turns kept in history before the oldest are dropped.
const MAX_HISTORY_MESSAGES: usize = 30;

/// Run the interactive chat command.
pub async fn run_chat(model: Option<String>, settings: Settings) -> Result<()> {
    let engine = RunEngine::from_settings(&settings);

    // Fail fast on routing problems rather than on the first message.
    let route = engine.registry().route(model.as_deref())?;

    println!("\n{}", style("Agora Chat").bold().cyan());
    println!("{}", style(format!("Using {}", route.label())).dim());
    println!(
        "{}\n",
        style("Type your message, or 'exit' to quit. Use 'clear' to reset the conversation and 'reload' to rediscover tools.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history: Vec<Message> = Vec::new();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("clear") {
            history.clear();
            Output::info("Conversation history cleared.");
            continue;
        }

        if input.eq_ignore_ascii_case("reload") {
            engine.clear_tool_cache();
            Output::info("Tool catalog will be rediscovered on the next message.");
            continue;
        }

        history.push(Message::user(input));
        print!("\n{} ", style("Agora:").cyan().bold());
        stdout.flush()?;

        match stream_run(&engine, history.clone(), model.as_deref(), false).await {
            Ok(outcome) => {
                println!();
                if outcome.aborted {
                    Output::warning("Run aborted.");
                }
                history.push(Message::assistant(outcome.text));
                trim_history(&mut history, MAX_HISTORY_MESSAGES);
            }
            Err(e) => {
                history.pop();
                Output::error(&format!("Error: {}", e));
            }
        }
    }

    Ok(())
}

/// Keep the most recent messages, starting on a user turn.
fn trim_history(history: &mut Vec<Message>, max_messages: usize) {
    if history.len() <= max_messages {
        return;
    }
    let mut start = history.len() - max_messages;
    while start < history.len() && history[start].role != Role::User {
        start += 1;
    }
    debug!(dropped = start, "Trimming chat history");
    history.drain(..start);
}
