//! Prompt builders for the extraction and scoring calls.

use vpa_models::{Kpi, Platform, VideoAnalysis};
use vpa_queue::AnalyzeVideoJob;

const RAW_JSON_ONLY: &str = "Your response must be a raw JSON object. Do not use markdown, \
do not wrap in code fences, do not add any text before or after the JSON. \
Start your response with { and end with }.";

/// Audience fields shared by both prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub platform: Platform,
    pub target_age: &'a str,
    pub target_gender: &'a str,
    pub target_tags: &'a [String],
}

impl<'a> PromptContext<'a> {
    pub fn from_job(job: &'a AnalyzeVideoJob) -> Self {
        Self {
            platform: job.platform,
            target_age: &job.target_age,
            target_gender: &job.target_gender,
            target_tags: &job.target_tags,
        }
    }

    fn interests(&self) -> String {
        if self.target_tags.is_empty() {
            "none".to_string()
        } else {
            self.target_tags.join(", ")
        }
    }
}

/// Prompt sent with the video attached; asks for tags, scores and characteristics.
pub fn extract_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        r#"You are a social media video analysis expert.

Target platform: {platform}
Target audience age: {age}
Target audience gender: {gender}
Target interests: {interests}
KPIs to evaluate: {kpis}

Watch this video carefully and evaluate ALL of the following:

CONTENT (up to 10 tags max, no more):
- Up to 10 tags covering topics, themes, visual style, audio, mood

SCORES (0-100 each):
- quality_score: overall production quality
- hook_strength: how engaging are the first 3 seconds
- audience_relevance: relevance to the target demographic

VIDEO CHARACTERISTICS (score each 0-100 unless noted):
- objective: one of "educate", "sell", "entertain", "inspire", "inform"
- storytelling: narrative strength and emotional connection
- audio_quality: clarity of speech/music, no distracting noise
- visual_quality: resolution, brightness, colour grading
- editing_pacing: rhythm of cuts, transitions, avoids lag
- audience_awareness: tone and style match the target demographic
- cta_present: true or false, is there a clear call to action
- lighting: proper lighting, well-lit scene
- stability: steady footage, no unwanted shake
- format_fit: how well aspect ratio and length suit the platform (0-100)

{raw_json}
{{
  "tags": ["tag1", "tag2"],
  "quality_score": 75,
  "hook_strength": 80,
  "audience_relevance": 70,
  "content_summary": "brief one-sentence description",
  "characteristics": {{
    "objective": "educate",
    "storytelling": 70,
    "audio_quality": 85,
    "visual_quality": 80,
    "editing_pacing": 75,
    "audience_awareness": 80,
    "cta_present": false,
    "lighting": 85,
    "stability": 90,
    "format_fit": 80
  }}
}}"#,
        platform = ctx.platform.label(),
        age = ctx.target_age,
        gender = ctx.target_gender,
        interests = ctx.interests(),
        kpis = Kpi::catalogue(),
        raw_json = RAW_JSON_ONLY,
    )
}

/// Text-only prompt turning the extraction output into KPI predictions.
pub fn score_prompt(ctx: &PromptContext<'_>, analysis: &VideoAnalysis) -> String {
    format!(
        r#"You are a social media performance prediction expert for {platform}.

Video analysis:
- Summary: {summary}
- Tags: {tags}
- Production quality: {quality}/100
- Hook strength: {hook}/100
- Audience relevance: {relevance}/100

Target audience:
- Platform: {platform}
- Age: {age}
- Gender: {gender}
- Interests: {interests}

For each KPI, predict realistic performance for a new creator account posting this video:
- predicted_value: realistic value with units (e.g. "8.5K", "3.2%", "$0.45")
- For "View Duration" specifically: return an integer in milliseconds only, no units (e.g. "45000")
- score: 0-100 (50=average, 80+=strong, 100=viral)
- explanation: one sentence

KPIs: {kpis}

{raw_json}
{{
  "results": [
    {{"kpi_name": "Impressions", "predicted_value": "12.5K", "score": 68, "explanation": "Good hook drives solid impressions."}}
  ]
}}"#,
        platform = ctx.platform.label(),
        summary = analysis.summary_label(),
        tags = analysis.tags_label(),
        quality = analysis.quality_or_default(),
        hook = analysis.hook_or_default(),
        relevance = analysis.relevance_or_default(),
        age = ctx.target_age,
        gender = ctx.target_gender,
        interests = ctx.interests(),
        kpis = Kpi::catalogue(),
        raw_json = RAW_JSON_ONLY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tags: &[String]) -> PromptContext<'_> {
        PromptContext {
            platform: Platform::Tiktok,
            target_age: "18-24, 25-34",
            target_gender: "female",
            target_tags: tags,
        }
    }

    #[test]
    fn test_extract_prompt_lists_audience_and_kpis() {
        let tags = vec!["fitness".to_string(), "cooking".to_string()];
        let prompt = extract_prompt(&ctx(&tags));

        assert!(prompt.starts_with("You are a social media video analysis expert."));
        assert!(prompt.contains("Target platform: TikTok"));
        assert!(prompt.contains("Target audience age: 18-24, 25-34"));
        assert!(prompt.contains("Target interests: fitness, cooking"));
        assert!(prompt.contains("KPIs to evaluate: Impressions, Reach, CPM"));
        assert!(prompt.contains("View Duration"));
        assert!(prompt.trim_end().ends_with('}'));
        assert!(prompt.contains("\"cta_present\": false"));
    }

    #[test]
    fn test_empty_interests_render_as_none() {
        let prompt = extract_prompt(&ctx(&[]));
        assert!(prompt.contains("Target interests: none"));
    }

    #[test]
    fn test_score_prompt_defaults_missing_scores() {
        let analysis = VideoAnalysis::default();
        let prompt = score_prompt(&ctx(&[]), &analysis);

        assert!(prompt.starts_with("You are a social media performance prediction expert for TikTok."));
        assert!(prompt.contains("- Summary: N/A"));
        assert!(prompt.contains("- Tags: N/A"));
        assert!(prompt.contains("- Production quality: 50/100"));
        assert!(prompt.contains("- Hook strength: 50/100"));
        assert!(prompt.contains("- Interests: none"));
        assert!(prompt.contains("integer in milliseconds"));
    }

    #[test]
    fn test_score_prompt_uses_analysis() {
        let analysis = VideoAnalysis::from_value(&serde_json::json!({
            "tags": ["recipe", "quick"],
            "quality_score": 82,
            "hook_strength": "91",
            "content_summary": "A 30 second pasta recipe."
        }));
        let prompt = score_prompt(&ctx(&[]), &analysis);

        assert!(prompt.contains("- Summary: A 30 second pasta recipe."));
        assert!(prompt.contains("- Tags: recipe, quick"));
        assert!(prompt.contains("- Production quality: 82/100"));
        assert!(prompt.contains("- Hook strength: 91/100"));
        assert!(prompt.contains("- Audience relevance: 50/100"));
    }
}
