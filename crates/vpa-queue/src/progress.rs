//! Progress events via Redis Pub/Sub.

use std::pin::Pin;

use futures_util::Stream;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vpa_models::{PipelineStep, RequestId, WsMessage};

use crate::error::QueueResult;

/// Live progress for one analysis request.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Progress event published to Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: RequestId,
    pub message: WsMessage,
}

/// Channel for publishing/subscribing to progress events.
#[derive(Clone)]
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn channel_name(request_id: &RequestId) -> String {
        format!("vpa:progress:{}", request_id)
    }

    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.request_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {} event to {}", event.message.message_type().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    async fn send(&self, request_id: &RequestId, message: WsMessage) -> QueueResult<()> {
        self.publish(&ProgressEvent {
            request_id: request_id.clone(),
            message,
        })
        .await
    }

    /// Announce that the pipeline entered `step`.
    pub async fn step(&self, request_id: &RequestId, step: PipelineStep) -> QueueResult<()> {
        self.send(request_id, WsMessage::step(step)).await
    }

    pub async fn log(&self, request_id: &RequestId, message: impl Into<String>) -> QueueResult<()> {
        self.send(request_id, WsMessage::log(message)).await
    }

    /// Non-fatal error; the job will be retried.
    pub async fn error(&self, request_id: &RequestId, message: impl Into<String>) -> QueueResult<()> {
        self.send(request_id, WsMessage::error(message)).await
    }

    /// The request has failed for good.
    pub async fn fatal_error(
        &self,
        request_id: &RequestId,
        message: impl Into<String>,
        details: Option<String>,
    ) -> QueueResult<()> {
        self.send(request_id, WsMessage::fatal_error(message, details))
            .await
    }

    pub async fn done(&self, request_id: &RequestId, result_count: u32) -> QueueResult<()> {
        self.send(request_id, WsMessage::done(request_id.as_str(), result_count))
            .await
    }

    /// Subscribe to progress events for a request.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(&self, request_id: &RequestId) -> QueueResult<ProgressStream> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(request_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_per_request() {
        let id = RequestId::from_string("abc");
        assert_eq!(ProgressChannel::channel_name(&id), "vpa:progress:abc");
    }

    #[test]
    fn test_event_payload_shape() {
        let event = ProgressEvent {
            request_id: RequestId::from_string("abc"),
            message: WsMessage::step(PipelineStep::Scoring),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["request_id"], "abc");
        assert_eq!(json["message"]["type"], "step");
        assert_eq!(json["message"]["step"], "scoring");

        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.request_id.as_str(), "abc");
    }
}
