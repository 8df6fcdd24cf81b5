//! Request-shaping profiles for model backends.
//!
//! Backends that claim OpenAI compatibility disagree on details: many reject
//! `parallel_tool_calls`, and several refuse tool schemas without a `type`.
//! A [`CompatProfile`] captures which patches a route needs, and
//! [`patch_request_by_compat`] applies them to an outgoing request body.

use crate::config::ProviderSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Wire API family of a backend. Also names the request-shaping profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiFamily {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl ApiFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::OpenAiCompatible => "openai-compatible",
        }
    }

    /// Family implied by a provider id alone.
    pub fn for_provider(provider_id: &str) -> Self {
        match provider_id {
            "anthropic" => Self::Anthropic,
            "openai" => Self::OpenAi,
            "google" => Self::Google,
            _ => Self::OpenAiCompatible,
        }
    }

    /// First-party endpoint (OpenAI chat-completions wire) for vendor families.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Self::OpenAiCompatible => None,
        }
    }

    /// Patch flags carried by the profile of this name:
    /// `(strip_parallel_tool_calls, normalize_tool_schema)`.
    fn patch_flags(&self) -> (bool, bool) {
        match self {
            Self::OpenAiCompatible => (true, true),
            Self::Anthropic | Self::OpenAi | Self::Google => (false, false),
        }
    }
}

impl std::str::FromStr for ApiFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" | "gemini" => Ok(Self::Google),
            "openai-compatible" | "openai_compatible" | "compatible" => Ok(Self::OpenAiCompatible),
            _ => Err(format!(
                "Unknown API family '{}' (expected anthropic, openai, google or openai-compatible)",
                s
            )),
        }
    }
}

impl std::fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved request-shaping rules for one provider and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatProfile {
    pub api: ApiFamily,
    pub compat_profile: ApiFamily,
    /// `"<api>:<compat_profile>"`, the tool catalog cache shard.
    pub cache_key: String,
    pub strip_parallel_tool_calls: bool,
    pub normalize_tool_schema: bool,
}

impl CompatProfile {
    fn new(api: ApiFamily, compat_profile: ApiFamily) -> Self {
        let (strip_parallel_tool_calls, normalize_tool_schema) = compat_profile.patch_flags();
        Self {
            api,
            compat_profile,
            cache_key: format!("{}:{}", api, compat_profile),
            strip_parallel_tool_calls,
            normalize_tool_schema,
        }
    }
}

/// Resolve the compatibility profile for a provider/model pair.
///
/// `config` should already have environment overrides applied.
pub fn resolve_compat(
    provider_id: &str,
    model_id: &str,
    config: Option<&ProviderSettings>,
) -> CompatProfile {
    let api = resolve_api(provider_id, config);

    let compat_profile = match config.and_then(|c| c.compat_profile) {
        // Strict vendor semantics can't be declared for a non-vendor endpoint.
        Some(ApiFamily::OpenAi) if api == ApiFamily::OpenAiCompatible => {
            ApiFamily::OpenAiCompatible
        }
        Some(profile) => profile,
        None => api,
    };

    let profile = CompatProfile::new(api, compat_profile);
    debug!(
        provider = provider_id,
        model = model_id,
        cache_key = %profile.cache_key,
        "Resolved compat profile"
    );
    profile
}

fn resolve_api(provider_id: &str, config: Option<&ProviderSettings>) -> ApiFamily {
    if let Some(api) = config.and_then(|c| c.api_type) {
        return api;
    }

    let family = ApiFamily::for_provider(provider_id);
    let base_url = config.and_then(|c| c.base_url.as_deref());
    match (family.default_base_url(), base_url) {
        (Some(default), Some(custom)) if !same_host(default, custom) => {
            ApiFamily::OpenAiCompatible
        }
        _ => family,
    }
}

fn same_host(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str() == b.host_str(),
        _ => a.trim_end_matches('/') == b.trim_end_matches('/'),
    }
}

/// Apply a profile's patches to a chat request body in place.
///
/// Idempotent: patching an already patched body changes nothing.
pub fn patch_request_by_compat(profile: &CompatProfile, body: &mut Value) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };

    if profile.strip_parallel_tool_calls {
        obj.remove("parallel_tool_calls");
    }

    if profile.normalize_tool_schema {
        if let Some(Value::Array(tools)) = obj.get_mut("tools") {
            for tool in tools {
                if let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut) {
                    let parameters = function
                        .entry("parameters")
                        .or_insert_with(|| Value::Object(Map::new()));
                    normalize_schema(parameters);
                }
            }
        }
    }
}

/// Coerce a tool argument schema into a valid JSON Schema object.
pub fn normalize_schema(schema: &mut Value) {
    if !schema.is_object() {
        *schema = Value::Object(Map::new());
    }
    if let Some(obj) = schema.as_object_mut() {
        if !obj.contains_key("type") {
            obj.insert("type".to_string(), Value::String("object".to_string()));
        }
        if obj.get("type").and_then(Value::as_str) == Some("object")
            && !obj.contains_key("properties")
        {
            obj.insert("properties".to_string(), Value::Object(Map::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(base_url: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            base_url: base_url.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_vendor_identity() {
        let profile = resolve_compat("openai", "gpt-4o", None);
        assert_eq!(profile.api, ApiFamily::OpenAi);
        assert_eq!(profile.compat_profile, ApiFamily::OpenAi);
        assert_eq!(profile.cache_key, "openai:openai");
        assert!(!profile.strip_parallel_tool_calls);
        assert!(!profile.normalize_tool_schema);

        assert_eq!(resolve_compat("anthropic", "claude", None).api, ApiFamily::Anthropic);
        assert_eq!(resolve_compat("google", "gemini", None).api, ApiFamily::Google);
    }

    #[test]
    fn test_unknown_provider_is_compatible() {
        let profile = resolve_compat("openrouter", "x/y", None);
        assert_eq!(profile.cache_key, "openai-compatible:openai-compatible");
        assert!(profile.strip_parallel_tool_calls);
        assert!(profile.normalize_tool_schema);
    }

    #[test]
    fn test_vendor_on_third_party_host_is_demoted() {
        let config = provider(Some("https://proxy.example.com/v1"));
        let profile = resolve_compat("openai", "gpt-4o", Some(&config));
        assert_eq!(profile.api, ApiFamily::OpenAiCompatible);

        let config = provider(Some("https://api.anthropic.com/v1/"));
        let profile = resolve_compat("anthropic", "claude-sonnet-4-5", Some(&config));
        assert_eq!(profile.api, ApiFamily::Anthropic);
    }

    #[test]
    fn test_explicit_api_type_wins() {
        let config = ProviderSettings {
            base_url: Some("https://proxy.example.com".to_string()),
            api_type: Some(ApiFamily::OpenAi),
            ..Default::default()
        };
        let profile = resolve_compat("openai", "gpt-4o", Some(&config));
        assert_eq!(profile.api, ApiFamily::OpenAi);
    }

    #[test]
    fn test_openai_override_coerced_for_compatible_api() {
        let config = ProviderSettings {
            compat_profile: Some(ApiFamily::OpenAi),
            ..Default::default()
        };
        let profile = resolve_compat("deepseek", "deepseek-chat", Some(&config));
        assert_eq!(profile.compat_profile, ApiFamily::OpenAiCompatible);
        assert!(profile.strip_parallel_tool_calls);

        let config = ProviderSettings {
            compat_profile: Some(ApiFamily::Anthropic),
            ..Default::default()
        };
        let profile = resolve_compat("deepseek", "deepseek-chat", Some(&config));
        assert_eq!(profile.compat_profile, ApiFamily::Anthropic);
        assert_eq!(profile.cache_key, "openai-compatible:anthropic");
        assert!(!profile.normalize_tool_schema);
    }

    #[test]
    fn test_patch_request() {
        let profile = resolve_compat("openrouter", "m", None);
        let mut body = json!({
            "parallel_tool_calls": true,
            "tools": [{"function": {"parameters": {}}}]
        });

        patch_request_by_compat(&profile, &mut body);
        assert!(body.get("parallel_tool_calls").is_none());
        assert_eq!(
            body["tools"][0]["function"]["parameters"],
            json!({"type": "object", "properties": {}})
        );

        let once = body.clone();
        patch_request_by_compat(&profile, &mut body);
        assert_eq!(body, once);
    }

    #[test]
    fn test_patch_leaves_strict_vendor_alone() {
        let profile = resolve_compat("openai", "gpt-4o", None);
        let mut body = json!({
            "parallel_tool_calls": false,
            "tools": [{"function": {"parameters": {}}}]
        });
        let original = body.clone();
        patch_request_by_compat(&profile, &mut body);
        assert_eq!(body, original);
    }

    #[test]
    fn test_normalize_keeps_declared_schema() {
        let mut schema = json!({"type": "string"});
        normalize_schema(&mut schema);
        assert_eq!(schema, json!({"type": "string"}));

        let mut schema = json!({"properties": {"q": {"type": "string"}}});
        normalize_schema(&mut schema);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["q"]["type"], "string");

        let mut schema = Value::Null;
        normalize_schema(&mut schema);
        assert_eq!(schema, json!({"type": "object", "properties": {}}));
    }
}
