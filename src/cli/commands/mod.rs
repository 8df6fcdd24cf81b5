//! CLI command implementations.

mod ask;
mod chat;
mod config;
mod models;
mod tools;

pub use ask::run_ask;
pub use chat::run_chat;
pub use config::run_config;
pub use models::run_models;
pub use tools::run_tools;
