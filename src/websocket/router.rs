//! Routing side effects for inbound chat frames.
//!
//! Lives apart from the socket loop so the routing contract can be
//! tested against fake counters and publishers. Per valid chat frame,
//! in order:
//!
//! 1. push `NEW_MESSAGE` to the recipient's live connection, and echo
//!    it to the sender's own connection (multi-tab mirror);
//! 2. bump the recipient's unseen counter regardless of liveness and
//!    claim the idempotency slot for this delivery;
//! 3. append the event to the durable log — never skipped, so an
//!    offline recipient still sees the message on next history fetch.

use chrono::Utc;
use std::sync::Arc;

use crate::{
    error::Result,
    events::{EventPublisher, MessageCreatedEvent},
    identity::Identity,
    unseen::UnseenCounterStore,
    websocket::{
        connection::{ConnectionManager, SendOutcome},
        types::{ChatFrame, ServerEvent, UnseenCountPayload},
    },
};

#[derive(Clone)]
pub struct ChatRouter {
    registry: ConnectionManager,
    counters: Arc<dyn UnseenCounterStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl ChatRouter {
    pub fn new(
        registry: ConnectionManager,
        counters: Arc<dyn UnseenCounterStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            registry,
            counters,
            publisher,
        }
    }

    pub fn registry(&self) -> &ConnectionManager {
        &self.registry
    }

    /// Route one valid chat frame. Returns `Err` only when the durable
    /// append failed; live-delivery and counter problems are logged
    /// and swallowed (chat send is fire-and-forget to the client).
    pub async fn handle_chat(&self, frame: ChatFrame) -> Result<()> {
        let sender = Identity::new(frame.sender_type, frame.from_user_id);
        let recipient = Identity::new(frame.sender_type.opposite(), frame.to_user_id);

        let event = MessageCreatedEvent {
            conversation_id: frame.conversation_id,
            sender_id: sender.id.clone(),
            sender_type: sender.role,
            content: frame.message_body,
            created_at: Utc::now(),
        };

        // Live delivery: fire-and-forget, gated only by registry state.
        let delivered = self
            .registry
            .send_to_user(&recipient, ServerEvent::NewMessage(event.clone()));
        match delivered {
            SendOutcome::Delivered => {
                tracing::debug!("Delivered message in {} to {}", event.conversation_id, recipient)
            }
            SendOutcome::NotConnected => {
                tracing::debug!("Recipient {} offline, persisting only", recipient)
            }
            SendOutcome::SendFailed => {
                tracing::warn!("Send to {} failed, connection tearing down", recipient)
            }
        }
        let _ = self
            .registry
            .send_to_user(&sender, ServerEvent::NewMessage(event.clone()));

        // Counter bump is best-effort; a Redis hiccup here is caught
        // up by the batch consumer via the unclaimed idempotency slot.
        match self.counters.increment(&recipient, &event.conversation_id).await {
            Ok(count) => {
                if let Err(e) = self.counters.mark_counted(&event, &recipient).await {
                    tracing::warn!("Failed to claim unseen idempotency slot: {}", e);
                }
                let _ = self.registry.send_to_user(
                    &recipient,
                    ServerEvent::UnseenCountUpdate(UnseenCountPayload {
                        conversation_id: event.conversation_id.clone(),
                        count,
                    }),
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Unseen counter increment failed for {} in {}: {}",
                    recipient,
                    event.conversation_id,
                    e
                );
            }
        }

        // Durable append happens last but unconditionally, before this
        // handler returns.
        self.publisher.publish_message_created(&event).await
    }

    /// `MARK_AS_SEEN`: zero the caller's counter for one conversation
    /// and echo the zeroed count. Persisted messages are untouched.
    pub async fn handle_seen(&self, caller: &Identity, conversation_id: &str) -> Result<()> {
        self.counters.clear(caller, conversation_id).await?;
        let _ = self.registry.send_to_user(
            caller,
            ServerEvent::UnseenCountUpdate(UnseenCountPayload {
                conversation_id: conversation_id.to_string(),
                count: 0,
            }),
        );
        Ok(())
    }
}
