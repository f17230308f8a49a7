//! Video characteristics produced by the extraction prompt.
//!
//! Every field is optional: the model's output is stored verbatim as the
//! request's `characteristics` blob, and these types only give typed access to
//! whatever subset of it parsed cleanly.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of content tags the extraction prompt asks for.
pub const MAX_CONTENT_TAGS: usize = 10;

/// Score assumed when the model omits one of the overview scores.
pub const DEFAULT_SCORE: u8 = 50;

/// What the video is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Educate,
    Sell,
    Entertain,
    Inspire,
    Inform,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Educate => "educate",
            Objective::Sell => "sell",
            Objective::Entertain => "entertain",
            Objective::Inspire => "inspire",
            Objective::Inform => "inform",
        }
    }
}

/// Creative and technical breakdown, each score 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoCharacteristics {
    #[serde(default, deserialize_with = "lenient_objective")]
    pub objective: Option<Objective>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub storytelling: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub audio_quality: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub visual_quality: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub editing_pacing: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub audience_awareness: Option<u8>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub cta_present: Option<bool>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub lighting: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub stability: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub format_fit: Option<u8>,
}

/// Output of the extraction prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoAnalysis {
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub quality_score: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub hook_strength: Option<u8>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub audience_relevance: Option<u8>,
    #[serde(default)]
    pub content_summary: Option<String>,
    #[serde(default)]
    pub characteristics: Option<VideoCharacteristics>,
}

impl VideoAnalysis {
    /// Parse the raw extraction blob, tolerating missing or mistyped fields.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let mut analysis: VideoAnalysis = serde_json::from_value(value.clone()).unwrap_or_default();
        analysis.tags.truncate(MAX_CONTENT_TAGS);
        analysis
    }

    pub fn quality_or_default(&self) -> u8 {
        self.quality_score.unwrap_or(DEFAULT_SCORE)
    }

    pub fn hook_or_default(&self) -> u8 {
        self.hook_strength.unwrap_or(DEFAULT_SCORE)
    }

    pub fn relevance_or_default(&self) -> u8 {
        self.audience_relevance.unwrap_or(DEFAULT_SCORE)
    }

    /// Summary as shown in the scoring prompt.
    pub fn summary_label(&self) -> &str {
        self.content_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("N/A")
    }

    /// Tags as shown in the scoring prompt.
    pub fn tags_label(&self) -> String {
        if self.tags.is_empty() {
            "N/A".to_string()
        } else {
            self.tags.join(", ")
        }
    }
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(raw.filter(|f| f.is_finite()).map(|f| f.round().clamp(0.0, 100.0) as u8))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Some(b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_objective<'de, D>(deserializer: D) -> Result<Option<Objective>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .map(|s| serde_json::Value::String(s.trim().to_ascii_lowercase()))
        .and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_extraction() {
        let raw = json!({
            "tags": ["fitness", "tutorial"],
            "quality_score": 75,
            "hook_strength": 80.4,
            "audience_relevance": "70",
            "content_summary": "A quick home workout.",
            "characteristics": {
                "objective": "Educate",
                "storytelling": 70,
                "cta_present": true,
                "format_fit": 120
            }
        });

        let analysis = VideoAnalysis::from_value(&raw);
        assert_eq!(analysis.hook_strength, Some(80));
        assert_eq!(analysis.audience_relevance, Some(70));
        let c = analysis.characteristics.unwrap();
        assert_eq!(c.objective, Some(Objective::Educate));
        assert_eq!(c.cta_present, Some(true));
        assert_eq!(c.format_fit, Some(100));
        assert_eq!(c.lighting, None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let analysis = VideoAnalysis::from_value(&json!({"objective": 3}));
        assert_eq!(analysis.quality_or_default(), 50);
        assert_eq!(analysis.summary_label(), "N/A");
        assert_eq!(analysis.tags_label(), "N/A");
    }

    #[test]
    fn test_unknown_objective_is_dropped() {
        let raw = json!({"characteristics": {"objective": "persuade"}});
        let analysis = VideoAnalysis::from_value(&raw);
        assert_eq!(analysis.characteristics.unwrap().objective, None);
    }

    #[test]
    fn test_tags_capped() {
        let tags: Vec<String> = (0..15).map(|i| format!("t{i}")).collect();
        let analysis = VideoAnalysis::from_value(&json!({ "tags": tags }));
        assert_eq!(analysis.tags.len(), MAX_CONTENT_TAGS);
    }
}
