//! Fire-and-forget event publication to the shared redis channel.

use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

use shared::redis::EVENTS_CHANNEL;

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Broadcast a named event. Failures are the sink's problem: publishing
    /// must never abort the caller's work.
    async fn publish(&self, event: &str, data: Value);
}

pub struct RedisEventPublisher {
    client: shared::Redis,
}

impl RedisEventPublisher {
    pub fn new(client: shared::Redis) -> Self {
        RedisEventPublisher { client }
    }
}

#[async_trait::async_trait]
impl EventSink for RedisEventPublisher {
    async fn publish(&self, event: &str, data: Value) {
        let body = serde_json::json!({ "event": event, "data": data }).to_string();
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                if let Err(err) = conn.publish::<_, _, ()>(EVENTS_CHANNEL, body).await {
                    warn!("Failed to publish {} event: {}", event, err);
                }
            }
            Err(err) => {
                warn!("Event bus unavailable, dropping {} event: {}", event, err);
            }
        }
    }
}
