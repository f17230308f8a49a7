//! Steps of the analysis pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseEnumError;

/// A label marking progress through the analysis pipeline.
///
/// Steps run strictly in [`PipelineStep::ALL`] order. The label is what gets
/// written to `analysis_requests.pipeline_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Fetching the video bytes from its URL
    Downloading,
    /// Sending the bytes to the model's file service
    Uploading,
    /// Waiting for the uploaded file to become ACTIVE
    Processing,
    /// Running the characteristics extraction prompt
    Extracting,
    /// Running the KPI scoring prompt
    Scoring,
    /// Writing results to the database
    Saving,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 6] = [
        PipelineStep::Downloading,
        PipelineStep::Uploading,
        PipelineStep::Processing,
        PipelineStep::Extracting,
        PipelineStep::Scoring,
        PipelineStep::Saving,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Downloading => "downloading",
            PipelineStep::Uploading => "uploading",
            PipelineStep::Processing => "processing",
            PipelineStep::Extracting => "extracting",
            PipelineStep::Scoring => "scoring",
            PipelineStep::Saving => "saving",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// `"3/6"` style position for progress messages.
    pub fn position(&self) -> String {
        format!("{}/{}", self.index() + 1, Self::ALL.len())
    }

    /// Rough completion percentage when this step starts.
    pub fn progress(&self) -> u8 {
        (self.index() * 100 / Self::ALL.len()) as u8
    }

    /// Description shown to users while the step runs.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::Downloading => "Downloading video",
            PipelineStep::Uploading => "Uploading to AI",
            PipelineStep::Processing => "AI processing video",
            PipelineStep::Extracting => "Extracting characteristics",
            PipelineStep::Scoring => "Scoring KPIs",
            PipelineStep::Saving => "Saving results",
        }
    }

    pub fn next(&self) -> Option<PipelineStep> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("pipeline step", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert_eq!(PipelineStep::Downloading.index(), 0);
        assert_eq!(PipelineStep::Saving.index(), 5);
        assert_eq!(PipelineStep::Processing.position(), "3/6");
        assert_eq!(PipelineStep::Scoring.next(), Some(PipelineStep::Saving));
        assert_eq!(PipelineStep::Saving.next(), None);
    }

    #[test]
    fn test_step_parse() {
        for step in PipelineStep::ALL {
            assert_eq!(step.as_str().parse::<PipelineStep>().unwrap(), step);
        }
        assert!("rendering".parse::<PipelineStep>().is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let values: Vec<u8> = PipelineStep::ALL.iter().map(|s| s.progress()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values[0], 0);
    }
}
