//! Tools command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::engine::RunEngine;
use anyhow::Result;
use console::style;

/// List the tool catalog for the resolved model route.
pub async fn run_tools(model: Option<String>, settings: Settings) -> Result<()> {
    if !settings.tools.is_enabled() {
        Output::warning("No tool server configured.");
        Output::info("Set one with `agora config set tools.command <path>`.");
        return Ok(());
    }

    let engine = RunEngine::from_settings(&settings);
    let route = engine.registry().route(model.as_deref())?;

    let spinner = Output::spinner("Discovering tools...");
    let tools = engine.tools(model.as_deref()).await;
    spinner.finish_and_clear();
    let tools = tools?;

    Output::header(&format!("Tools ({}, {})", tools.len(), route.compat.cache_key));
    for tool in tools.values() {
        println!("  {} {}", style("*").cyan(), style(&tool.name).bold());
        if !tool.description.is_empty() {
            println!("    {}", style(&tool.description).dim());
        }
    }

    Ok(())
}
