//! Shared data models for the video performance analyzer.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis requests and their lifecycle (status, pipeline step)
//! - Target-audience criteria (platform, age ranges, genders, tags)
//! - KPI predictions and persisted results
//! - Video characteristics produced by the extraction prompt
//! - WebSocket progress message schemas

pub mod audience;
pub mod characteristics;
pub mod job;
pub mod kpi;
pub mod pipeline;
pub mod profile;
pub mod request;
pub mod ws;

// Re-export common types
pub use audience::{AgeRange, Gender, Platform, TargetAudience};
pub use characteristics::{Objective, VideoAnalysis, VideoCharacteristics};
pub use job::JobId;
pub use kpi::{AnalysisResult, Kpi, KpiPrediction, NewAnalysisResult, ScoreBand, ScoringResponse};
pub use pipeline::PipelineStep;
pub use profile::Profile;
pub use request::{AnalysisRequest, NewAnalysisRequest, RequestId, RequestStatus, VideoSource};
pub use ws::{WsMessage, WsMessageType};

/// Error returned when parsing one of the string-backed enums fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
