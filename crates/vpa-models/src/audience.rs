//! Target-audience criteria attached to an analysis request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseEnumError;

/// Maximum number of interest tags kept per request.
pub const MAX_TAGS: usize = 20;

/// Maximum length of a single interest tag, in characters.
pub const MAX_TAG_LEN: usize = 50;

/// Social platform the video is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Instagram,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Tiktok, Platform::Instagram, Platform::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
        }
    }

    /// Human-readable name used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Tiktok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::Youtube => "YouTube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Platform::Tiktok),
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::Youtube),
            _ => Err(ParseEnumError::new("platform", s)),
        }
    }
}

/// Audience age bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum AgeRange {
    #[serde(rename = "13-17")]
    Teens,
    #[serde(rename = "18-24")]
    YoungAdults,
    #[serde(rename = "25-34")]
    Adults25,
    #[serde(rename = "35-44")]
    Adults35,
    #[serde(rename = "45-54")]
    Adults45,
    #[serde(rename = "55+")]
    Seniors,
}

impl AgeRange {
    pub const ALL: [AgeRange; 6] = [
        AgeRange::Teens,
        AgeRange::YoungAdults,
        AgeRange::Adults25,
        AgeRange::Adults35,
        AgeRange::Adults45,
        AgeRange::Seniors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRange::Teens => "13-17",
            AgeRange::YoungAdults => "18-24",
            AgeRange::Adults25 => "25-34",
            AgeRange::Adults35 => "35-44",
            AgeRange::Adults45 => "45-54",
            AgeRange::Seniors => "55+",
        }
    }
}

impl FromStr for AgeRange {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AgeRange::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("age range", s))
    }
}

/// Audience gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    All,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::All => "all",
        }
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "all" => Ok(Gender::All),
            _ => Err(ParseEnumError::new("gender", s)),
        }
    }
}

/// Who the video is meant to reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TargetAudience {
    pub platform: Platform,
    pub ages: Vec<AgeRange>,
    pub genders: Vec<Gender>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TargetAudience {
    /// Build an audience, deduplicating selections and normalizing tags.
    pub fn new(platform: Platform, ages: Vec<AgeRange>, genders: Vec<Gender>, tags: Vec<String>) -> Self {
        let mut ages = ages;
        ages.sort();
        ages.dedup();
        let mut genders = genders;
        genders.sort();
        genders.dedup();

        Self {
            platform,
            ages,
            genders,
            tags: normalize_tags(tags),
        }
    }

    /// Storage form of the age selection (`"18-24, 25-34"`).
    pub fn age_label(&self) -> String {
        self.ages.iter().map(AgeRange::as_str).collect::<Vec<_>>().join(", ")
    }

    /// Storage form of the gender selection (`"male, female"`).
    pub fn gender_label(&self) -> String {
        self.genders.iter().map(Gender::as_str).collect::<Vec<_>>().join(", ")
    }

    /// Tags as shown in prompts; `"none"` when no tags were given.
    pub fn tags_label(&self) -> String {
        if self.tags.is_empty() {
            "none".to_string()
        } else {
            self.tags.join(", ")
        }
    }
}

/// Trim, drop empties, dedupe (case-insensitive) and cap tag count and length.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len().min(MAX_TAGS));
    for tag in tags {
        let tag: String = tag.trim().chars().take(MAX_TAG_LEN).collect();
        let tag = tag.trim().to_string();
        if tag.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            continue;
        }
        out.push(tag);
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_and_label() {
        assert_eq!("TikTok".parse::<Platform>().unwrap(), Platform::Tiktok);
        assert_eq!(Platform::Youtube.label(), "YouTube");
        assert!("vimeo".parse::<Platform>().is_err());
    }

    #[test]
    fn test_age_range_serde_uses_bucket_labels() {
        let json = serde_json::to_string(&AgeRange::Seniors).unwrap();
        assert_eq!(json, "\"55+\"");
        let parsed: AgeRange = serde_json::from_str("\"18-24\"").unwrap();
        assert_eq!(parsed, AgeRange::YoungAdults);
    }

    #[test]
    fn test_audience_labels() {
        let audience = TargetAudience::new(
            Platform::Instagram,
            vec![AgeRange::Adults25, AgeRange::YoungAdults, AgeRange::Adults25],
            vec![Gender::Female, Gender::Male],
            vec![],
        );
        assert_eq!(audience.age_label(), "18-24, 25-34");
        assert_eq!(audience.gender_label(), "male, female");
        assert_eq!(audience.tags_label(), "none");
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(vec![
            "  fitness ".into(),
            "".into(),
            "Fitness".into(),
            "x".repeat(80),
        ]);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], "fitness");
        assert_eq!(tags[1].chars().count(), MAX_TAG_LEN);

        let many: Vec<String> = (0..40).map(|i| format!("tag{i}")).collect();
        assert_eq!(normalize_tags(many).len(), MAX_TAGS);
    }
}
