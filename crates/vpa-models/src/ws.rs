//! WebSocket progress message types.
//!
//! The worker publishes these over Redis Pub/Sub and the API relays them to
//! clients watching an analysis request.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{AnalysisRequest, AnalysisResult, PipelineStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    Snapshot,
    Step,
    Log,
    Error,
    Done,
}

impl WsMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsMessageType::Snapshot => "snapshot",
            WsMessageType::Step => "step",
            WsMessageType::Log => "log",
            WsMessageType::Error => "error",
            WsMessageType::Done => "done",
        }
    }
}

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Persisted state of the request, sent once when a client subscribes
    Snapshot {
        request: Box<AnalysisRequest>,
        results: Vec<AnalysisResult>,
    },

    /// A pipeline step started
    Step {
        step: PipelineStep,
        label: String,
        /// `"2/6"` style position
        position: String,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Free-form log line
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Error message; `fatal` means the request is now `failed`
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default)]
        fatal: bool,
        timestamp: DateTime<Utc>,
    },

    /// Results are saved and the request is `completed`
    Done {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "resultCount")]
        result_count: u32,
    },
}

impl WsMessage {
    pub fn snapshot(request: AnalysisRequest, results: Vec<AnalysisResult>) -> Self {
        WsMessage::Snapshot {
            request: Box::new(request),
            results,
        }
    }

    /// Create a step-started message.
    pub fn step(step: PipelineStep) -> Self {
        WsMessage::Step {
            step,
            label: step.label().to_string(),
            position: step.position(),
            progress: step.progress(),
            timestamp: Utc::now(),
        }
    }

    /// Create a log message.
    pub fn log(message: impl Into<String>) -> Self {
        WsMessage::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a non-fatal error message (the job will be retried).
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
            details: None,
            fatal: false,
            timestamp: Utc::now(),
        }
    }

    /// Create an error message for a request that has been marked failed.
    pub fn fatal_error(message: impl Into<String>, details: Option<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
            details,
            fatal: true,
            timestamp: Utc::now(),
        }
    }

    pub fn done(request_id: impl Into<String>, result_count: u32) -> Self {
        WsMessage::Done {
            request_id: request_id.into(),
            result_count,
        }
    }

    pub fn message_type(&self) -> WsMessageType {
        match self {
            WsMessage::Snapshot { .. } => WsMessageType::Snapshot,
            WsMessage::Step { .. } => WsMessageType::Step,
            WsMessage::Log { .. } => WsMessageType::Log,
            WsMessage::Error { .. } => WsMessageType::Error,
            WsMessage::Done { .. } => WsMessageType::Done,
        }
    }

    /// True for messages after which no further progress will arrive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WsMessage::Done { .. } | WsMessage::Error { fatal: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_serialization() {
        let msg = WsMessage::log("Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"log\""));
        assert!(json.contains("\"message\":\"Hello\""));
    }

    #[test]
    fn test_step_message() {
        let msg = WsMessage::step(PipelineStep::Extracting);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step"], "extracting");
        assert_eq!(json["position"], "4/6");
    }

    #[test]
    fn test_terminal_messages() {
        assert!(WsMessage::done("req", 10).is_terminal());
        assert!(WsMessage::fatal_error("boom", None).is_terminal());
        assert!(!WsMessage::error("transient").is_terminal());
        assert!(!WsMessage::step(PipelineStep::Saving).is_terminal());
    }

    #[test]
    fn test_done_uses_camel_case_fields() {
        let json = serde_json::to_string(&WsMessage::done("abc", 10)).unwrap();
        assert!(json.contains("\"requestId\":\"abc\""));
        assert!(json.contains("\"resultCount\":10"));
    }
}
