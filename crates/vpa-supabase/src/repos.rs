//! Typed repositories for analysis requests, results and profiles.

use chrono::Utc;
use metrics::counter;
use serde_json::json;
use tracing::info;

use vpa_models::{
    AnalysisRequest, AnalysisResult, Kpi, NewAnalysisRequest, NewAnalysisResult, PipelineStep, Profile,
    RequestId, RequestStatus,
};

use crate::client::SupabaseClient;
use crate::error::{SupabaseError, SupabaseResult};
use crate::query::{Order, Query};

const REQUESTS_TABLE: &str = "analysis_requests";
const RESULTS_TABLE: &str = "analysis_results";
const PROFILES_TABLE: &str = "profiles";

/// Default page size for history listings.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Repository for `analysis_requests` rows.
#[derive(Clone)]
pub struct AnalysisRequestRepository {
    client: SupabaseClient,
}

impl AnalysisRequestRepository {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Insert a new request and return the stored row.
    pub async fn create(&self, request: &NewAnalysisRequest) -> SupabaseResult<AnalysisRequest> {
        let rows: Vec<AnalysisRequest> = self.client.insert(REQUESTS_TABLE, request).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SupabaseError::invalid_response("insert returned no rows"))?;
        counter!("analysis_requests_created_total", "platform" => row.platform.as_str()).increment(1);
        info!(request_id = %row.id, user_id = %row.user_id, "Created analysis request");
        Ok(row)
    }

    pub async fn get(&self, id: &RequestId) -> SupabaseResult<Option<AnalysisRequest>> {
        self.client
            .select_one(REQUESTS_TABLE, Query::new().eq("id", id.as_str()))
            .await
    }

    /// Fetch a request only if it belongs to `user_id`.
    pub async fn get_for_user(&self, id: &RequestId, user_id: &str) -> SupabaseResult<Option<AnalysisRequest>> {
        self.client
            .select_one(
                REQUESTS_TABLE,
                Query::new().eq("id", id.as_str()).eq("user_id", user_id),
            )
            .await
    }

    /// A user's requests, newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: u32) -> SupabaseResult<Vec<AnalysisRequest>> {
        let query = Query::new()
            .eq("user_id", user_id)
            .order("created_at", Order::Desc)
            .limit(limit);
        self.client.select(REQUESTS_TABLE, &query).await
    }

    pub async fn set_status(&self, id: &RequestId, status: RequestStatus) -> SupabaseResult<()> {
        self.patch(id, json!({ "status": status, "updated_at": Utc::now() }))
            .await
    }

    /// Record the step now running; optionally move the status as well.
    pub async fn update_step(
        &self,
        id: &RequestId,
        step: PipelineStep,
        status: Option<RequestStatus>,
    ) -> SupabaseResult<()> {
        let mut patch = json!({ "pipeline_step": step, "updated_at": Utc::now() });
        if let Some(status) = status {
            patch["status"] = json!(status);
            patch["error_message"] = serde_json::Value::Null;
        }
        self.patch(id, patch).await
    }

    /// Mark completed, attaching the extraction output.
    pub async fn complete(&self, id: &RequestId, characteristics: Option<&serde_json::Value>) -> SupabaseResult<()> {
        let mut patch = json!({
            "status": RequestStatus::Completed,
            "error_message": null,
            "updated_at": Utc::now(),
        });
        if let Some(c) = characteristics {
            patch["characteristics"] = c.clone();
        }
        self.patch(id, patch).await?;
        info!(request_id = %id, "Analysis request completed");
        Ok(())
    }

    /// Mark failed with a user-facing message.
    pub async fn fail(&self, id: &RequestId, message: &str) -> SupabaseResult<()> {
        self.patch(
            id,
            json!({
                "status": RequestStatus::Failed,
                "error_message": message,
                "updated_at": Utc::now(),
            }),
        )
        .await?;
        info!(request_id = %id, "Analysis request failed: {}", message);
        Ok(())
    }

    async fn patch(&self, id: &RequestId, patch: serde_json::Value) -> SupabaseResult<()> {
        let rows: Vec<serde_json::Value> = self
            .client
            .update(REQUESTS_TABLE, &Query::new().select("id").eq("id", id.as_str()), &patch)
            .await?;
        if rows.is_empty() {
            return Err(SupabaseError::not_found(format!("{}/{}", REQUESTS_TABLE, id)));
        }
        Ok(())
    }
}

/// Repository for `analysis_results` rows.
#[derive(Clone)]
pub struct AnalysisResultRepository {
    client: SupabaseClient,
}

impl AnalysisResultRepository {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn insert_many(&self, rows: &[NewAnalysisResult]) -> SupabaseResult<Vec<AnalysisResult>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.client.insert(RESULTS_TABLE, rows).await
    }

    /// Replace every result row of a request; reruns of a request never duplicate KPIs.
    pub async fn replace_for_request(
        &self,
        request_id: &RequestId,
        rows: &[NewAnalysisResult],
    ) -> SupabaseResult<Vec<AnalysisResult>> {
        self.client
            .delete(RESULTS_TABLE, &Query::new().eq("request_id", request_id.as_str()))
            .await?;
        self.insert_many(rows).await
    }

    /// Results of a request in KPI catalogue order.
    pub async fn list_for_request(&self, request_id: &RequestId) -> SupabaseResult<Vec<AnalysisResult>> {
        let query = Query::new()
            .eq("request_id", request_id.as_str())
            .order("created_at", Order::Asc);
        let mut rows: Vec<AnalysisResult> = self.client.select(RESULTS_TABLE, &query).await?;
        rows.sort_by_key(|r| {
            r.kpi_name
                .parse::<Kpi>()
                .map(|k| k as usize)
                .unwrap_or(Kpi::ALL.len())
        });
        Ok(rows)
    }
}

/// Repository for `profiles` rows.
#[derive(Clone)]
pub struct ProfileRepository {
    client: SupabaseClient,
}

impl ProfileRepository {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, user_id: &str) -> SupabaseResult<Option<Profile>> {
        self.client
            .select_one(PROFILES_TABLE, Query::new().eq("id", user_id))
            .await
    }

    pub async fn upsert_display_name(&self, user_id: &str, display_name: &str) -> SupabaseResult<Profile> {
        let rows: Vec<Profile> = self
            .client
            .upsert(
                PROFILES_TABLE,
                &json!({ "id": user_id, "display_name": display_name }),
                "id",
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SupabaseError::invalid_response("upsert returned no rows"))
    }
}
