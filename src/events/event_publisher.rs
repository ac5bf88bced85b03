//! Durable message log backed by NATS JetStream.
//!
//! Every accepted chat message is appended to the `CHAT_MESSAGES`
//! stream under `chat.messages.<conversation_id>` before the gateway
//! handler returns. Subjects are per-conversation, so JetStream's
//! per-subject append ordering is exactly the per-conversation
//! ordering guarantee the pipeline promises. Cross-conversation
//! ordering is not guaranteed anywhere.
//!
//! The batch persistence consumer reads this stream with a durable
//! consumer (see `crate::consumer`), decoupling real-time delivery
//! from storage writes.

use async_nats::jetstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    identity::Role,
};

pub const MESSAGE_STREAM_NAME: &str = "CHAT_MESSAGES";
const MESSAGE_SUBJECT_PREFIX: &str = "chat.messages";

/// Immutable message-created event, the payload of both the durable
/// log record and the `NEW_MESSAGE` push frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatedEvent {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_type: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageCreatedEvent {
    /// Subject this event is published under.
    pub fn subject(&self) -> String {
        format!("{}.{}", MESSAGE_SUBJECT_PREFIX, self.conversation_id)
    }
}

/// Appends message-created events to the durable log.
///
/// A trait so the router can be exercised in tests without a NATS
/// server behind it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_message_created(&self, event: &MessageCreatedEvent) -> Result<()>;
}

/// JetStream-backed publisher used in production.
#[derive(Clone)]
pub struct NatsEventPublisher {
    jetstream: jetstream::Context,
}

impl NatsEventPublisher {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish_message_created(&self, event: &MessageCreatedEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| AppError::Internal(format!("Failed to encode event: {}", e)))?;

        // Wait for the JetStream ack so the caller knows the event is
        // durably appended; transient reconnect/retry is the NATS
        // client's own policy.
        self.jetstream
            .publish(event.subject(), payload.into())
            .await
            .map_err(|e| AppError::EventLog(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| AppError::EventLog(format!("Publish not acknowledged: {}", e)))?;

        Ok(())
    }
}

/// Create the message stream if it does not exist yet.
///
/// Idempotent — safe to run on every startup.
pub async fn ensure_message_stream(jetstream: &jetstream::Context) -> Result<()> {
    jetstream
        .get_or_create_stream(jetstream::stream::Config {
            name: MESSAGE_STREAM_NAME.to_string(),
            subjects: vec![format!("{}.>", MESSAGE_SUBJECT_PREFIX)],
            ..Default::default()
        })
        .await
        .map_err(|e| AppError::EventLog(format!("Failed to ensure message stream: {}", e)))?;

    tracing::info!("JetStream stream '{}' ready", MESSAGE_STREAM_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn event_serializes_with_wire_field_names() {
        let event = MessageCreatedEvent {
            conversation_id: "c1".to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::User,
            content: "hi".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["senderId"], "1");
        assert_eq!(json["senderType"], "user");
        assert_eq!(json["content"], "hi");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn subject_is_partitioned_by_conversation() {
        let event = MessageCreatedEvent {
            conversation_id: "c42".to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::Seller,
            content: "x".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(event.subject(), "chat.messages.c42");
    }
}
