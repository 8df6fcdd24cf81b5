//! Model routing: turn a user-supplied model string into a concrete backend.
//!
//! Accepted forms, in resolution order: `provider/model`, a built-in model
//! id, a vendor-prefixed id (`claude-*`, `gpt-*`, `gemini-*`, ...), or any
//! id routed to the configured default provider. Credentials come from the
//! environment first and persisted settings second.

use crate::compat::{resolve_compat, ApiFamily, CompatProfile};
use crate::config::{ProviderSettings, Settings};
use crate::error::RouteError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Built-in model ids and the provider that serves them.
pub const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("claude-opus-4-1", "anthropic"),
    ("claude-sonnet-4-5", "anthropic"),
    ("claude-haiku-4-5", "anthropic"),
    ("gpt-4.1", "openai"),
    ("gpt-4o", "openai"),
    ("gpt-4o-mini", "openai"),
    ("o3-mini", "openai"),
    ("gemini-2.5-pro", "google"),
    ("gemini-2.5-flash", "google"),
    ("deepseek-chat", "deepseek"),
    ("deepseek-reasoner", "deepseek"),
];

/// Retired ids and their replacements.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("claude-3-opus", "claude-opus-4-1"),
    ("claude-3-5-sonnet", "claude-sonnet-4-5"),
    ("claude-3-5-sonnet-latest", "claude-sonnet-4-5"),
    ("claude-3-5-haiku", "claude-haiku-4-5"),
    ("gpt-4-turbo", "gpt-4o"),
    ("gpt-4-turbo-preview", "gpt-4o"),
    ("gemini-pro", "gemini-2.5-pro"),
    ("gemini-1.5-pro", "gemini-2.5-pro"),
    ("gemini-1.5-flash", "gemini-2.5-flash"),
];

const VENDOR_PREFIXES: &[(&str, &str)] = &[
    ("claude-", "anthropic"),
    ("gpt-", "openai"),
    ("o1-", "openai"),
    ("o3-", "openai"),
    ("o4-", "openai"),
    ("gemini-", "google"),
];

/// Endpoints of well-known OpenAI-compatible providers.
const WELL_KNOWN_BASE_URLS: &[(&str, &str)] = &[
    ("deepseek", "https://api.deepseek.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("mistral", "https://api.mistral.ai/v1"),
];

const VENDORS: &[&str] = &["anthropic", "openai", "google"];

/// A resolved model backend for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub requested_model: String,
    pub provider_id: String,
    pub model_id: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub compat: CompatProfile,
}

impl ModelRoute {
    /// Qualified `provider/model` label.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

/// Provider credentials layered as environment over persisted settings.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderSettings>,
    default_provider: Option<String>,
    default_model: Option<String>,
    env: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Build a registry from settings and the process environment.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_env(settings, std::env::vars())
    }

    /// Build a registry from settings and an explicit environment.
    pub fn with_env(settings: &Settings, env: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            providers: settings.providers.clone(),
            default_provider: settings.model.default_provider.clone(),
            default_model: settings.model.default_model.clone(),
            env: env.into_iter().filter(|(_, v)| !v.trim().is_empty()).collect(),
        }
    }

    /// Effective settings for a provider, environment taking precedence.
    pub fn provider_settings(&self, provider_id: &str) -> ProviderSettings {
        let mut settings = self.providers.get(provider_id).cloned().unwrap_or_default();

        if let Some(key) = api_key_vars(provider_id)
            .iter()
            .find_map(|var| self.env.get(var))
        {
            settings.api_key = Some(key.clone());
        }
        if let Some(url) = self.env.get(&format!("{}_BASE_URL", env_prefix(provider_id))) {
            settings.base_url = Some(url.clone());
        }
        settings.api_key = settings.api_key.filter(|k| !k.trim().is_empty());

        settings
    }

    /// Providers that currently have a usable API key.
    pub fn configured_providers(&self) -> Vec<String> {
        let mut candidates: BTreeSet<String> = VENDORS.iter().map(|p| p.to_string()).collect();
        candidates.extend(self.providers.keys().cloned());
        candidates.extend(BUILTIN_MODELS.iter().map(|(_, p)| p.to_string()));
        candidates.extend(self.default_provider.clone());

        candidates
            .into_iter()
            .filter(|p| self.provider_settings(p).api_key.is_some())
            .collect()
    }

    /// Resolve a requested model into a route.
    pub fn route(&self, requested: Option<&str>) -> Result<ModelRoute, RouteError> {
        let requested = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_model.clone());

        let (provider_id, model_id) = match requested.as_deref() {
            Some(model) => self.identify(model)?,
            None => {
                let provider = self.default_provider.clone().ok_or_else(|| RouteError::NoModel {
                    hint: self.credential_hint(),
                })?;
                let model = default_model_for(&provider).ok_or_else(|| RouteError::NoModel {
                    hint: format!("Provider '{}' has no built-in default model.", provider),
                })?;
                (provider, model.to_string())
            }
        };

        let settings = self.provider_settings(&provider_id);
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| RouteError::MissingCredential {
                provider: provider_id.clone(),
                hint: missing_key_hint(&provider_id),
            })?;

        let compat = resolve_compat(&provider_id, &model_id, Some(&settings));
        let base_url = settings
            .base_url
            .clone()
            .or_else(|| well_known_base_url(&provider_id).map(str::to_string))
            .or_else(|| {
                ApiFamily::for_provider(&provider_id)
                    .default_base_url()
                    .map(str::to_string)
            });

        info!(provider = %provider_id, model = %model_id, compat = %compat.cache_key, "Routed model");

        Ok(ModelRoute {
            requested_model: requested.unwrap_or_default(),
            provider_id,
            model_id,
            api_key,
            base_url,
            compat,
        })
    }

    fn identify(&self, requested: &str) -> Result<(String, String), RouteError> {
        if let Some((provider, model)) = requested.split_once('/') {
            if !provider.is_empty() && !model.is_empty() {
                return Ok((provider.to_string(), canonical_model(model).to_string()));
            }
        }

        let model = canonical_model(requested);
        if let Some(provider) = builtin_provider(model) {
            debug!(model, provider, "Matched built-in model");
            return Ok((provider.to_string(), model.to_string()));
        }
        if let Some(provider) = prefix_provider(model) {
            debug!(model, provider, "Inferred provider from model prefix");
            return Ok((provider.to_string(), model.to_string()));
        }
        if let Some(provider) = &self.default_provider {
            return Ok((provider.clone(), model.to_string()));
        }

        Err(RouteError::UnknownModel {
            model: requested.to_string(),
            hint: self.credential_hint(),
        })
    }

    fn credential_hint(&self) -> String {
        let configured = self.configured_providers();
        if configured.is_empty() {
            "No provider credentials found; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY."
                .to_string()
        } else {
            format!("Providers with credentials: {}.", configured.join(", "))
        }
    }
}

/// Substitute a retired model id with its replacement.
pub fn canonical_model(model: &str) -> &str {
    LEGACY_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == model)
        .map(|(_, current)| *current)
        .unwrap_or(model)
}

fn builtin_provider(model: &str) -> Option<&'static str> {
    BUILTIN_MODELS
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, provider)| *provider)
}

fn prefix_provider(model: &str) -> Option<&'static str> {
    VENDOR_PREFIXES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, provider)| *provider)
}

fn default_model_for(provider: &str) -> Option<&'static str> {
    BUILTIN_MODELS
        .iter()
        .find(|(_, p)| *p == provider)
        .map(|(model, _)| *model)
}

fn well_known_base_url(provider: &str) -> Option<&'static str> {
    WELL_KNOWN_BASE_URLS
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, url)| *url)
}

pub(crate) fn env_prefix(provider_id: &str) -> String {
    provider_id
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Environment variables consulted for a provider's key, in priority order.
pub fn api_key_vars(provider_id: &str) -> Vec<String> {
    match provider_id {
        "anthropic" => vec!["ANTHROPIC_API_KEY".into(), "CLAUDE_API_KEY".into()],
        "openai" => vec!["OPENAI_API_KEY".into()],
        "google" => vec![
            "GOOGLE_GENERATIVE_AI_API_KEY".into(),
            "GEMINI_API_KEY".into(),
            "GOOGLE_API_KEY".into(),
        ],
        other => vec![format!("{}_API_KEY", env_prefix(other))],
    }
}

fn missing_key_hint(provider_id: &str) -> String {
    let vars = api_key_vars(provider_id);
    let env = match vars.split_first() {
        Some((first, [])) => first.clone(),
        Some((first, rest)) => format!("{} (or {})", first, rest.join(", ")),
        None => String::new(),
    };
    format!(
        "Set {} or run `agora config set providers.{}.api_key <key>`.",
        env, provider_id
    )
}
