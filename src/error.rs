//! Error types for Agora.

use thiserror::Error;

/// Library-level error type for Agora operations.
#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(String),

    #[error("Tool failed: {0}")]
    ToolFailed(String),

    #[error("Tool transport error: {0}")]
    ToolTransport(String),

    #[error("Model API error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure to turn a requested model into a usable route.
///
/// The display text is shown to users verbatim, so every variant names the
/// next thing to try.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error(
        "Unknown model '{model}'. Use the 'provider/model' form (e.g. openai/gpt-4o) \
         or set a default provider with `agora config set model.default_provider <id>`. {hint}"
    )]
    UnknownModel { model: String, hint: String },

    #[error("No API key for provider '{provider}'. {hint}")]
    MissingCredential { provider: String, hint: String },

    #[error(
        "No model specified and no default configured. Pass --model or run \
         `agora config set model.default_model <provider/model>`. {hint}"
    )]
    NoModel { hint: String },
}

/// Result type alias for Agora operations.
pub type Result<T> = std::result::Result<T, AgoraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_is_transparent() {
        let err: AgoraError = RouteError::MissingCredential {
            provider: "openai".to_string(),
            hint: "Set OPENAI_API_KEY.".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "No API key for provider 'openai'. Set OPENAI_API_KEY."
        );
    }
}
