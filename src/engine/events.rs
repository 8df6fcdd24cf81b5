//! Event protocol emitted by a run.

use serde::Serialize;
use serde_json::Value;

/// One event of a run. `seq` starts at 1 and increases by one per event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub run_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads, serialized with a kebab-case `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventKind {
    RunStart {
        provider: String,
        model: String,
    },
    TextDelta {
        text: String,
    },
    ToolStart {
        call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        output: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    RunFinish {
        text: String,
        aborted: bool,
        steps: usize,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run-start",
            Self::TextDelta { .. } => "text-delta",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolResult { .. } => "tool-result",
            Self::Error { .. } => "error",
            Self::RunFinish { .. } => "run-finish",
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            call_id: None,
        }
    }
}

/// Stamps events with the run id and the next sequence number.
#[derive(Debug)]
pub(crate) struct EventSequencer {
    run_id: String,
    seq: u64,
}

impl EventSequencer {
    pub(crate) fn new(run_id: String) -> Self {
        Self { run_id, seq: 0 }
    }

    pub(crate) fn next(&mut self, kind: EventKind) -> StreamEvent {
        self.seq += 1;
        StreamEvent {
            run_id: self.run_id.clone(),
            seq: self.seq,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequencer_is_gapless() {
        let mut seq = EventSequencer::new("run-1".to_string());
        let first = seq.next(EventKind::error("a"));
        let second = seq.next(EventKind::error("b"));
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(second.run_id, "run-1");
    }

    #[test]
    fn test_wire_shape() {
        let event = StreamEvent {
            run_id: "r".to_string(),
            seq: 3,
            kind: EventKind::ToolStart {
                call_id: "c1".to_string(),
                tool_name: "get_post".to_string(),
                args: json!({"id": 1}),
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "runId": "r",
                "seq": 3,
                "type": "tool-start",
                "callId": "c1",
                "toolName": "get_post",
                "args": {"id": 1}
            })
        );

        let finish = EventKind::RunFinish {
            text: "ok".to_string(),
            aborted: true,
            steps: 2,
        };
        assert_eq!(finish.name(), "run-finish");
        assert_eq!(serde_json::to_value(&finish).unwrap()["aborted"], json!(true));
    }
}
