//! WebSocket progress stream for one analysis request.
//!
//! The socket first receives a `snapshot` of the persisted request, then every
//! progress event the worker publishes, until a terminal `done` or fatal
//! `error` arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vpa_models::{AnalysisRequest, RequestId, RequestStatus, WsMessage};

use crate::auth::{bearer_token, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Open progress sockets per user.
#[derive(Default)]
pub struct UserConnectionTracker {
    connections: Mutex<HashMap<String, usize>>,
}

impl UserConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot for `user_id` unless they already hold `max`.
    pub fn try_acquire(&self, user_id: &str, max: usize) -> bool {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let count = connections.entry(user_id.to_string()).or_insert(0);
        if *count >= max {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release(&self, user_id: &str) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = connections.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(user_id);
            }
        }
    }

    pub fn count(&self, user_id: &str) -> usize {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.get(user_id).copied().unwrap_or(0)
    }
}

static USER_CONNECTIONS: LazyLock<UserConnectionTracker> = LazyLock::new(UserConnectionTracker::new);

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Browsers can't set headers on a WebSocket handshake, so the token may come
/// in the query string; an Authorization header is honoured too.
fn handshake_token<'a>(query: &'a WsAuthQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    query.token.as_deref().filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
    })
}

/// `GET /ws/analyses/:id`
pub async fn ws_analysis(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = handshake_token(&query, &headers).ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let user = AuthUser::from(state.jwt.verify_token(token)?);

    let request_id = RequestId::from_string(id);
    if !request_id.is_valid() {
        return Err(ApiError::not_found("Analysis not found"));
    }
    if state.requests.get_for_user(&request_id, &user.id).await?.is_none() {
        return Err(ApiError::not_found("Analysis not found"));
    }

    if !USER_CONNECTIONS.try_acquire(&user.id, state.config.ws_max_connections_per_user) {
        warn!(user_id = %user.id, "Too many progress sockets");
        return Err(ApiError::RateLimited);
    }
    let user_id = user.id.clone();
    let slot = scopeguard::guard(user_id, |uid| USER_CONNECTIONS.release(&uid));

    Ok(ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        let _active = ActiveSocket::open("analysis");
        handle_analysis_socket(socket, state, request_id).await;
    }))
}

/// Counts an upgraded socket in the active-connections gauge until dropped.
/// Only created once the upgrade has completed, so failed handshakes never
/// touch the gauge.
struct ActiveSocket;

impl ActiveSocket {
    fn open(endpoint: &'static str) -> Self {
        let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);
        metrics::record_ws_connection(endpoint);
        Self
    }
}

impl Drop for ActiveSocket {
    fn drop(&mut self) {
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    }
}

/// Queue a message on the outbound channel, waiting when the buffer is full.
async fn send_ws_message(tx: &mpsc::Sender<Message>, msg: &WsMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize WebSocket message: {}", e);
            return false;
        }
    };
    metrics::record_ws_message_sent("analysis", msg.message_type().as_str());

    match tx.try_send(Message::Text(json)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(m)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(m).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Message that ends the stream for a request already in a terminal state.
pub fn terminal_message(request: &AnalysisRequest, result_count: u32) -> Option<WsMessage> {
    match request.status {
        RequestStatus::Completed => Some(WsMessage::done(request.id.as_str(), result_count)),
        RequestStatus::Failed => Some(WsMessage::fatal_error(
            request
                .error_message
                .clone()
                .unwrap_or_else(|| "Analysis failed".to_string()),
            None,
        )),
        RequestStatus::Pending | RequestStatus::Processing => None,
    }
}

async fn handle_analysis_socket(socket: WebSocket, state: AppState, request_id: RequestId) {
    let (ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    relay_progress(&state, &request_id, &tx, &mut receiver).await;

    drop(tx);
    let _ = send_task.await;
    debug!(request_id = %request_id, "Progress socket closed");
}

async fn relay_progress(
    state: &AppState,
    request_id: &RequestId,
    tx: &mpsc::Sender<Message>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) {
    // Subscribe before reading the snapshot so no event falls in between
    let mut stream = match state.progress.subscribe(request_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(request_id = %request_id, "Failed to subscribe to progress: {}", e);
            send_ws_message(tx, &WsMessage::fatal_error("Progress stream unavailable", None)).await;
            return;
        }
    };

    let (request, results) = match load_snapshot(state, request_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            send_ws_message(tx, &WsMessage::fatal_error("Analysis not found", None)).await;
            return;
        }
        Err(e) => {
            warn!(request_id = %request_id, "Failed to load snapshot: {}", e);
            send_ws_message(tx, &WsMessage::fatal_error("Failed to load analysis", None)).await;
            return;
        }
    };

    let terminal = terminal_message(&request, results.len() as u32);
    if !send_ws_message(tx, &WsMessage::snapshot(request, results)).await {
        return;
    }
    if let Some(msg) = terminal {
        send_ws_message(tx, &msg).await;
        return;
    }

    info!(request_id = %request_id, "Streaming analysis progress");

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();
    let mut finished = false;

    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(event) => {
                        if !send_ws_message(tx, &event.message).await {
                            warn!("WebSocket send failed, client disconnected");
                            return;
                        }
                        if event.message.is_terminal() {
                            finished = true;
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > WS_CLIENT_TIMEOUT {
                    info!(request_id = %request_id, "Client timed out");
                    return;
                }
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!("Client closed connection");
                        return;
                    }
                    Some(Ok(_)) => last_activity = Instant::now(),
                }
            }
        }
    }

    // Pub/Sub dropped out before the end; report the persisted outcome instead
    if !finished {
        if let Ok(Some((request, results))) = load_snapshot(state, request_id).await {
            if let Some(msg) = terminal_message(&request, results.len() as u32) {
                send_ws_message(tx, &msg).await;
            }
        }
    }
}

async fn load_snapshot(
    state: &AppState,
    request_id: &RequestId,
) -> Result<Option<(AnalysisRequest, Vec<vpa_models::AnalysisResult>)>, vpa_supabase::SupabaseError> {
    let Some(request) = state.requests.get(request_id).await? else {
        return Ok(None);
    };
    let results = if request.status == RequestStatus::Completed {
        state.results.list_for_request(request_id).await?
    } else {
        Vec::new()
    };
    Ok(Some((request, results)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vpa_models::{Platform, VideoSource};

    fn request(status: RequestStatus, error: Option<&str>) -> AnalysisRequest {
        AnalysisRequest {
            id: RequestId::new(),
            user_id: "u".into(),
            video_url: "https://cdn.example.com/v.mp4".into(),
            video_source: VideoSource::Link,
            platform: Platform::Tiktok,
            target_age: "18-24".into(),
            target_gender: "all".into(),
            target_tags: vec![],
            status,
            pipeline_step: None,
            error_message: error.map(str::to_string),
            characteristics: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_terminal_message() {
        assert!(terminal_message(&request(RequestStatus::Processing, None), 0).is_none());

        let done = terminal_message(&request(RequestStatus::Completed, None), 10).unwrap();
        assert!(matches!(done, WsMessage::Done { result_count: 10, .. }));

        let failed = terminal_message(&request(RequestStatus::Failed, Some("Video download failed (404)")), 0).unwrap();
        match failed {
            WsMessage::Error { message, fatal, .. } => {
                assert!(fatal);
                assert_eq!(message, "Video download failed (404)");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_connection_tracker_limits_per_user() {
        let tracker = UserConnectionTracker::new();
        assert!(tracker.try_acquire("a", 2));
        assert!(tracker.try_acquire("a", 2));
        assert!(!tracker.try_acquire("a", 2));
        assert!(tracker.try_acquire("b", 2));

        tracker.release("a");
        assert_eq!(tracker.count("a"), 1);
        tracker.release("a");
        tracker.release("a");
        assert_eq!(tracker.count("a"), 0);
    }

    #[test]
    fn test_active_socket_gauge_is_balanced() {
        let before = ACTIVE_WS_CONNECTIONS.load(Ordering::SeqCst);
        {
            let _a = ActiveSocket::open("analysis");
            let _b = ActiveSocket::open("analysis");
            assert_eq!(ACTIVE_WS_CONNECTIONS.load(Ordering::SeqCst), before + 2);
        }
        assert_eq!(ACTIVE_WS_CONNECTIONS.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_handshake_token_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer from-header".parse().unwrap());

        let query = WsAuthQuery { token: Some("from-query".into()) };
        assert_eq!(handshake_token(&query, &headers), Some("from-query"));

        let query = WsAuthQuery { token: None };
        assert_eq!(handshake_token(&query, &headers), Some("from-header"));
        assert_eq!(handshake_token(&query, &HeaderMap::new()), None);
    }
}
