//! Configuration module for Agora.
//!
//! Handles loading and saving settings: default model, per-provider
//! credentials, run engine limits and the external tool server.

mod settings;

pub use settings::{
    AgentSettings, GeneralSettings, ModelSettings, ProviderSettings, Settings,
    ToolServerSettings,
};
