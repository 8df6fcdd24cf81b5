//! Models command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::router::{ProviderRegistry, BUILTIN_MODELS};
use anyhow::Result;
use console::style;

/// List providers with credentials and the built-in model table.
pub fn run_models(settings: Settings) -> Result<()> {
    let registry = ProviderRegistry::from_settings(&settings);
    let configured = registry.configured_providers();

    Output::header("Providers with credentials");
    if configured.is_empty() {
        Output::warning("None. Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY.");
    }
    for provider in &configured {
        let route_settings = registry.provider_settings(provider);
        let base_url = route_settings.base_url.as_deref().unwrap_or("default endpoint");
        Output::kv(provider, base_url);
    }

    Output::header("Built-in models");
    for (model, provider) in BUILTIN_MODELS {
        let marker = if configured.iter().any(|p| p == provider) {
            style("*").green()
        } else {
            style("-").dim()
        };
        println!("  {} {}/{}", marker, provider, model);
    }

    if let Some(default) = settings
        .model
        .default_model
        .as_deref()
        .or(settings.model.default_provider.as_deref())
    {
        Output::header("Default");
        Output::list_item(default);
    }

    Ok(())
}
