//! KPI catalogue, model predictions and persisted result rows.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseEnumError, RequestId};

/// The platform-performance indicators predicted for every video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum Kpi {
    Impressions,
    Reach,
    #[serde(rename = "CPM")]
    Cpm,
    #[serde(rename = "CTR")]
    Ctr,
    #[serde(rename = "CPC")]
    Cpc,
    #[serde(rename = "Completion Rate")]
    CompletionRate,
    Conversions,
    #[serde(rename = "CPA")]
    Cpa,
    #[serde(rename = "ROAS")]
    Roas,
    #[serde(rename = "View Duration")]
    ViewDuration,
}

impl Kpi {
    pub const ALL: [Kpi; 10] = [
        Kpi::Impressions,
        Kpi::Reach,
        Kpi::Cpm,
        Kpi::Ctr,
        Kpi::Cpc,
        Kpi::CompletionRate,
        Kpi::Conversions,
        Kpi::Cpa,
        Kpi::Roas,
        Kpi::ViewDuration,
    ];

    /// Display name, also the value stored in `analysis_results.kpi_name`.
    pub fn name(&self) -> &'static str {
        match self {
            Kpi::Impressions => "Impressions",
            Kpi::Reach => "Reach",
            Kpi::Cpm => "CPM",
            Kpi::Ctr => "CTR",
            Kpi::Cpc => "CPC",
            Kpi::CompletionRate => "Completion Rate",
            Kpi::Conversions => "Conversions",
            Kpi::Cpa => "CPA",
            Kpi::Roas => "ROAS",
            Kpi::ViewDuration => "View Duration",
        }
    }

    /// Comma-separated list of every KPI name, in catalogue order.
    pub fn catalogue() -> String {
        Self::ALL.iter().map(Kpi::name).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for Kpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kpi {
    type Err = ParseEnumError;

    /// Case-insensitive match on the display name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Kpi::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("kpi", s))
    }
}

/// Qualitative band for a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Strong,
    Average,
    Weak,
}

impl ScoreBand {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 70 => ScoreBand::Strong,
            s if s >= 40 => ScoreBand::Average,
            _ => ScoreBand::Weak,
        }
    }
}

/// One KPI prediction as returned by the scoring prompt.
///
/// Models are loose with types: values may arrive as numbers and scores as
/// floats or strings, so both are coerced on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KpiPrediction {
    #[serde(default)]
    pub kpi_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub predicted_value: String,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: Option<i32>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl KpiPrediction {
    pub fn band(&self) -> Option<ScoreBand> {
        self.score.map(ScoreBand::from_score)
    }
}

/// Top-level shape of the scoring prompt's JSON output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScoringResponse {
    #[serde(default)]
    pub results: Vec<KpiPrediction>,
}

impl ScoringResponse {
    /// Clean up raw model output before persisting it.
    ///
    /// Drops rows without a name, canonicalizes known KPI names, keeps the
    /// first row per KPI, clamps scores into 0-100, blanks empty explanations
    /// and orders known KPIs by catalogue position (unknown names last).
    pub fn normalize(self) -> Vec<KpiPrediction> {
        let mut out: Vec<KpiPrediction> = Vec::with_capacity(self.results.len());
        for mut p in self.results {
            let name = p.kpi_name.trim();
            if name.is_empty() {
                continue;
            }
            p.kpi_name = name
                .parse::<Kpi>()
                .map(|k| k.name().to_string())
                .unwrap_or_else(|_| name.to_string());
            if out.iter().any(|o| o.kpi_name == p.kpi_name) {
                continue;
            }
            p.predicted_value = p.predicted_value.trim().to_string();
            p.score = p.score.map(|s| s.clamp(0, 100));
            p.explanation = p
                .explanation
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty());
            out.push(p);
        }
        out.sort_by_key(|p| {
            p.kpi_name
                .parse::<Kpi>()
                .map(|k| k as usize)
                .unwrap_or(Kpi::ALL.len())
        });
        out
    }
}

/// Insert payload for an `analysis_results` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysisResult {
    pub request_id: RequestId,
    pub kpi_name: String,
    pub predicted_value: String,
    pub score: Option<i32>,
    pub explanation: Option<String>,
}

impl NewAnalysisResult {
    pub fn from_prediction(request_id: &RequestId, p: KpiPrediction) -> Self {
        Self {
            request_id: request_id.clone(),
            kpi_name: p.kpi_name,
            predicted_value: p.predicted_value,
            score: p.score,
            explanation: p.explanation,
        }
    }
}

/// A row of `analysis_results`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    pub id: String,
    pub request_id: RequestId,
    pub kpi_name: String,
    pub predicted_value: String,
    #[serde(default)]
    pub score: Option<i32>,
    #[serde(default)]
    pub explanation: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn band(&self) -> Option<ScoreBand> {
        self.score.map(ScoreBand::from_score)
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(|v| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            .or_else(|| n.as_f64().map(|f| f.round() as i32)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i32),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kpi_catalogue_order() {
        assert_eq!(Kpi::ALL.len(), 10);
        assert!(Kpi::catalogue().starts_with("Impressions, Reach, CPM"));
        assert!(Kpi::catalogue().ends_with("ROAS, View Duration"));
        assert_eq!("completion rate".parse::<Kpi>().unwrap(), Kpi::CompletionRate);
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(ScoreBand::from_score(100), ScoreBand::Strong);
        assert_eq!(ScoreBand::from_score(70), ScoreBand::Strong);
        assert_eq!(ScoreBand::from_score(69), ScoreBand::Average);
        assert_eq!(ScoreBand::from_score(40), ScoreBand::Average);
        assert_eq!(ScoreBand::from_score(39), ScoreBand::Weak);
    }

    #[test]
    fn test_lenient_prediction_parsing() {
        let raw = r#"{"results":[
            {"kpi_name":"View Duration","predicted_value":8500,"score":"72.6","explanation":"Good hook."},
            {"kpi_name":"CTR","predicted_value":"1.8%","score":55.4}
        ]}"#;
        let parsed: ScoringResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results[0].predicted_value, "8500");
        assert_eq!(parsed.results[0].score, Some(73));
        assert_eq!(parsed.results[1].score, Some(55));
        assert_eq!(parsed.results[1].explanation, None);
    }

    #[test]
    fn test_normalize_cleans_model_output() {
        let response = ScoringResponse {
            results: vec![
                KpiPrediction {
                    kpi_name: "roas".into(),
                    predicted_value: " 2.1x ".into(),
                    score: Some(140),
                    explanation: Some("  ".into()),
                },
                KpiPrediction {
                    kpi_name: "".into(),
                    predicted_value: "1".into(),
                    score: Some(10),
                    explanation: None,
                },
                KpiPrediction {
                    kpi_name: "Impressions".into(),
                    predicted_value: "12K".into(),
                    score: Some(-5),
                    explanation: Some("Broad appeal.".into()),
                },
                KpiPrediction {
                    kpi_name: "ROAS".into(),
                    predicted_value: "9x".into(),
                    score: Some(90),
                    explanation: None,
                },
            ],
        };

        let out = response.normalize();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kpi_name, "Impressions");
        assert_eq!(out[0].score, Some(0));
        assert_eq!(out[1].kpi_name, "ROAS");
        assert_eq!(out[1].predicted_value, "2.1x");
        assert_eq!(out[1].score, Some(100));
        assert_eq!(out[1].explanation, None);
    }
}
