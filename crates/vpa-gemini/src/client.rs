//! Gemini HTTP client.

use std::time::Instant;

use metrics::{counter, histogram};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::{GeminiError, GeminiResult};
use crate::types::{
    Content, FileData, FileInfo, FileState, GenerateRequest, GenerateResponse, GenerationConfig, Part,
    UploadResponse, UploadedFile,
};

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> GeminiResult<Self> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("vpa-gemini/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> GeminiResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Upload raw video bytes to the Files API.
    pub async fn upload_file(&self, data: Vec<u8>, mime_type: &str) -> GeminiResult<UploadedFile> {
        let url = format!("{}/upload/v1beta/files?uploadType=media", self.config.base_url);
        let size = data.len();
        debug!(bytes = size, mime = %mime_type, "Uploading file to Gemini");

        let response = self
            .http
            .post(&url)
            .timeout(self.config.upload_timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .header("Content-Type", mime_type)
            .header("X-Goog-Upload-Protocol", "raw")
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GeminiError::Upload(format!("({}) {}", status.as_u16(), text)));
        }

        let body: UploadResponse = response.json().await?;
        let file = body
            .file
            .ok_or_else(|| GeminiError::Upload("no file in upload response".to_string()))?;
        let uri = file
            .uri
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GeminiError::Upload(format!("no file URI in upload response for {}", file.name)))?;

        info!(file = %file.name, bytes = size, "Uploaded file to Gemini");
        Ok(UploadedFile {
            name: file.name,
            uri,
            mime_type: file.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }

    /// Fetch a file's metadata and processing state.
    pub async fn get_file(&self, name: &str) -> GeminiResult<FileInfo> {
        let url = format!("{}/v1beta/{}", self.config.base_url, name);
        let response = self
            .http
            .get(&url)
            .timeout(self.config.request_timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GeminiError::api(status.as_u16(), format!("file status check failed: {}", text)));
        }
        Ok(response.json().await?)
    }

    /// Poll until the file is `ACTIVE`.
    ///
    /// A `FAILED` state is terminal; running past the activation timeout
    /// yields [`GeminiError::Timeout`].
    pub async fn wait_for_active(&self, name: &str) -> GeminiResult<FileInfo> {
        let started = Instant::now();
        let deadline = started + self.config.activation_timeout;

        loop {
            let info = self.get_file(name).await?;
            match info.state {
                FileState::Active => {
                    let waited = started.elapsed();
                    histogram!("gemini_file_activation_seconds").record(waited.as_secs_f64());
                    debug!(file = %name, waited_ms = waited.as_millis() as u64, "File is ACTIVE");
                    return Ok(info);
                }
                FileState::Failed => {
                    let detail = info
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no detail".to_string());
                    return Err(GeminiError::FileFailed(format!("{}: {}", name, detail)));
                }
                state => debug!(file = %name, ?state, "File not ready yet"),
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(GeminiError::Timeout(self.config.activation_timeout.as_secs()));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Run a prompt, optionally attaching an uploaded file, and return the text.
    ///
    /// Tries the primary model first, then each fallback model in order.
    /// A rejected API key stops the fallback chain immediately.
    pub async fn generate(&self, prompt: &str, file: Option<&UploadedFile>) -> GeminiResult<String> {
        let mut last_error = None;

        for model in self.config.models() {
            debug!("Attempting Gemini generateContent with model: {}", model);
            let start = Instant::now();
            match self.generate_with_model(model, prompt, file).await {
                Ok(text) => {
                    counter!("gemini_requests_total", "model" => model.to_string(), "status" => "ok").increment(1);
                    histogram!("gemini_generate_seconds", "model" => model.to_string())
                        .record(start.elapsed().as_secs_f64());
                    return Ok(text);
                }
                Err(e) => {
                    counter!("gemini_requests_total", "model" => model.to_string(), "status" => "error").increment(1);
                    warn!("Gemini model {} failed: {}", model, e);
                    if e.is_auth_error() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GeminiError::config("no Gemini model configured")))
    }

    /// Delete an uploaded file. Gemini expires files on its own, so callers
    /// usually ignore failures here.
    pub async fn delete_file(&self, name: &str) -> GeminiResult<()> {
        let url = format!("{}/v1beta/{}", self.config.base_url, name);
        let response = self
            .http
            .delete(&url)
            .timeout(self.config.request_timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let text = response.text().await.unwrap_or_default();
            return Err(GeminiError::api(status.as_u16(), text));
        }
        Ok(())
    }

    async fn generate_with_model(
        &self,
        model: &str,
        prompt: &str,
        file: Option<&UploadedFile>,
    ) -> GeminiResult<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.config.base_url, model);

        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];
        if let Some(f) = file {
            parts.push(Part::File {
                file_data: FileData {
                    mime_type: f.mime_type.clone(),
                    file_uri: f.uri.clone(),
                },
            });
        }

        let request = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GeminiError::api(status.as_u16(), text));
        }

        let body: GenerateResponse = response.json().await?;
        match body.first_text() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(GeminiError::EmptyResponse(format!(
                "no text in response (finish reason: {}, feedback: {})",
                body.finish_reason().unwrap_or("none"),
                body.prompt_feedback
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "none".to_string())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> GeminiClient {
        let config = GeminiConfig {
            base_url: server.uri(),
            poll_interval: Duration::from_millis(10),
            activation_timeout: Duration::from_millis(200),
            ..GeminiConfig::new("test-key")
        };
        GeminiClient::new(config).unwrap()
    }

    fn text_response(text: &str) -> serde_json::Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] }, "finishReason": "STOP" }] })
    }

    #[tokio::test]
    async fn test_upload_file_parses_resource() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .and(query_param("uploadType", "media"))
            .and(header("X-Goog-Upload-Protocol", "raw"))
            .and(header("content-type", "video/webm"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file": { "name": "files/abc", "uri": "https://gen/files/abc", "mimeType": "video/webm", "state": "PROCESSING" }
            })))
            .mount(&server)
            .await;

        let file = test_client(&server).upload_file(vec![1, 2, 3], "video/webm").await.unwrap();
        assert_eq!(file.name, "files/abc");
        assert_eq!(file.uri, "https://gen/files/abc");
        assert_eq!(file.mime_type, "video/webm");
    }

    #[tokio::test]
    async fn test_upload_without_uri_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/v1beta/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file": { "name": "files/abc" } })))
            .mount(&server)
            .await;

        let err = test_client(&server).upload_file(vec![0], "video/mp4").await.unwrap_err();
        assert!(matches!(err, GeminiError::Upload(_)));
    }

    #[tokio::test]
    async fn test_wait_for_active_polls_until_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "files/abc", "state": "PROCESSING" })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "files/abc", "state": "ACTIVE" })))
            .mount(&server)
            .await;

        let info = test_client(&server).wait_for_active("files/abc").await.unwrap();
        assert_eq!(info.state, FileState::Active);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_active_failed_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "files/abc", "state": "FAILED" })))
            .mount(&server)
            .await;

        let err = test_client(&server).wait_for_active("files/abc").await.unwrap_err();
        assert!(matches!(err, GeminiError::FileFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_wait_for_active_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "files/abc", "state": "PROCESSING" })))
            .mount(&server)
            .await;

        let err = test_client(&server).wait_for_active("files/abc").await.unwrap_err();
        assert!(matches!(err, GeminiError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_generate_attaches_file_and_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash-lite:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json", "maxOutputTokens": 8192 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("```json\n{\"tags\":[\"a\"]}\n```")))
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        client.config.fallback_models = vec!["gemini-2.5-flash-lite".to_string()];

        let file = UploadedFile {
            name: "files/abc".into(),
            uri: "https://gen/files/abc".into(),
            mime_type: "video/mp4".into(),
        };
        let text = client.generate("describe", Some(&file)).await.unwrap();
        assert!(text.contains("\"tags\":[\"a\"]"));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(body["contents"][0]["parts"][1]["fileData"]["fileUri"], "https://gen/files/abc");
    }

    #[tokio::test]
    async fn test_generate_auth_error_stops_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        client.config.fallback_models = vec!["gemini-2.5-pro".to_string()];

        let err = client.generate("hi", None).await.unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_generate_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = test_client(&server).generate("hi", None).await.unwrap_err();
        assert!(matches!(err, GeminiError::EmptyResponse(_)));
    }
}
