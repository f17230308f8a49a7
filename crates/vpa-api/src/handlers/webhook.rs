//! Results callback for analyses processed outside the worker.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use validator::Validate;

use vpa_models::{KpiPrediction, NewAnalysisResult, RequestId, ScoringResponse};

use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::state::AppState;

/// Caller presented the webhook secret (or none is configured).
pub struct WebhookAuthorized;

#[axum::async_trait]
impl FromRequestParts<AppState> for WebhookAuthorized {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.webhook_secret.as_deref() else {
            return Ok(Self);
        };

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Unauthorized"))?;

        if secret_matches(bearer.token(), expected) {
            Ok(Self)
        } else {
            warn!("Webhook called with a wrong secret");
            Err(ApiError::unauthorized("Unauthorized"))
        }
    }
}

fn secret_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct WebhookResult {
    #[validate(length(min = 1, message = "kpi_name is required"))]
    pub kpi_name: String,
    #[validate(length(min = 1, message = "predicted_value is required"))]
    pub predicted_value: String,
    #[validate(range(min = 0, max = 100))]
    pub score: Option<i32>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl From<WebhookResult> for KpiPrediction {
    fn from(r: WebhookResult) -> Self {
        KpiPrediction {
            kpi_name: r.kpi_name,
            predicted_value: r.predicted_value,
            score: r.score,
            explanation: r.explanation,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResultsBody {
    #[validate(length(min = 1, message = "requestId is required"))]
    pub request_id: String,
    #[validate(length(min = 1, message = "results must not be empty"), nested)]
    pub results: Vec<WebhookResult>,
    /// Optional extraction output to store with the request
    #[serde(default)]
    pub characteristics: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub result_count: usize,
}

/// Attach externally computed KPI results and complete the request.
///
/// Results replace any existing rows, so a repeated callback is harmless.
pub async fn receive_results(
    State(state): State<AppState>,
    _auth: WebhookAuthorized,
    ValidatedJson(body): ValidatedJson<WebhookResultsBody>,
) -> ApiResult<Json<WebhookResponse>> {
    let request_id = RequestId::from_string(body.request_id.trim());
    if !request_id.is_valid() {
        return Err(ApiError::validation("requestId must be a UUID"));
    }

    if state.requests.get(&request_id).await?.is_none() {
        return Err(ApiError::not_found("Analysis request not found"));
    }

    let rows = result_rows(&request_id, body.results)?;

    let stored = state
        .results
        .replace_for_request(&request_id, &rows)
        .await
        .map_err(|e| {
            warn!(request_id = %request_id, "Failed to insert webhook results: {}", e);
            ApiError::internal("Failed to insert results")
        })?;

    state
        .requests
        .complete(&request_id, body.characteristics.as_ref())
        .await?;

    let result_count = stored.len();
    if let Err(e) = state.progress.done(&request_id, result_count as u32).await {
        warn!(request_id = %request_id, "Failed to publish completion: {}", e);
    }

    info!(request_id = %request_id, result_count, "Stored results from webhook");

    Ok(Json(WebhookResponse {
        success: true,
        result_count,
    }))
}

/// Normalize posted results into rows; a payload with no usable KPI is rejected.
fn result_rows(request_id: &RequestId, results: Vec<WebhookResult>) -> ApiResult<Vec<NewAnalysisResult>> {
    let predictions = ScoringResponse {
        results: results.into_iter().map(KpiPrediction::from).collect(),
    }
    .normalize();

    if predictions.is_empty() {
        return Err(ApiError::validation("results contain no named KPI"));
    }

    Ok(predictions
        .into_iter()
        .map(|p| NewAnalysisResult::from_prediction(request_id, p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kpi_name: &str) -> WebhookResult {
        WebhookResult {
            kpi_name: kpi_name.to_string(),
            predicted_value: "1%".to_string(),
            score: Some(50),
            explanation: None,
        }
    }

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("secret", "secret"));
        assert!(!secret_matches("secret", "secreT"));
        assert!(!secret_matches("secret", "secret2"));
        assert!(!secret_matches("", "secret"));
    }

    #[test]
    fn test_blank_kpi_names_are_rejected() {
        let id = RequestId::from_string("0b6f1f4e-3c1a-4a57-9d7e-4a3f5f1b2c3d");

        let blank = vec![result("   "), result("\t")];
        assert!(blank.iter().all(|r| r.validate().is_ok()));
        let err = result_rows(&id, blank).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let rows = result_rows(&id, vec![result("  "), result("ctr")]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kpi_name, "CTR");
    }

    #[test]
    fn test_body_validation() {
        let body: WebhookResultsBody = serde_json::from_value(serde_json::json!({
            "requestId": "0b6f1f4e-3c1a-4a57-9d7e-4a3f5f1b2c3d",
            "results": [
                {"kpi_name": "CTR", "predicted_value": "2.1%", "score": 140}
            ]
        }))
        .unwrap();
        assert!(body.validate().is_err());

        let body: WebhookResultsBody = serde_json::from_value(serde_json::json!({
            "requestId": "0b6f1f4e-3c1a-4a57-9d7e-4a3f5f1b2c3d",
            "results": []
        }))
        .unwrap();
        assert!(body.validate().is_err());

        let body: WebhookResultsBody = serde_json::from_value(serde_json::json!({
            "requestId": "0b6f1f4e-3c1a-4a57-9d7e-4a3f5f1b2c3d",
            "results": [
                {"kpi_name": "ctr", "predicted_value": "2.1%", "score": 72, "explanation": "Strong hook."}
            ]
        }))
        .unwrap();
        assert!(body.validate().is_ok());
    }
}
