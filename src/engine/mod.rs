//! Run engine: drives a bounded model/tool loop and emits a typed,
//! sequenced event stream.
//!
//! A run routes the requested model, attaches the cached tool catalog and
//! then calls the model up to `max_steps` times through a [`ModelChannel`].
//! Every run starts with `run-start` and ends with exactly one `run-finish`,
//! including aborted and failed runs.

mod channel;
mod events;
mod runner;

pub use channel::{
    ChannelRequest, Message, ModelChannel, ModelPart, PartStream, Role, ToolCallRecord,
    ToolResultRecord, Turn,
};
pub use events::{EventKind, StreamEvent};
pub use runner::{EventStream, RunEngine, RunOptions};
