//! Per-(recipient, conversation) unseen message counters.
//!
//! A UX convenience, not a read receipt: increments are best-effort
//! and the count may drift under infrastructure failures. It is
//! incremented on every delivery to a recipient and zeroed only by an
//! explicit "seen" action from that recipient.
//!
//! Because the flush path retries with at-least-once semantics, every
//! increment is guarded by an idempotency slot keyed on
//! (conversation, sender, createdAt, recipient): whichever component
//! claims the slot first (router at delivery time, consumer after a
//! flush) does the counting, and retries become no-ops.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::{error::Result, events::MessageCreatedEvent, identity::Identity};

/// Idempotency slots only need to outlive the flush retry window.
const COUNTED_SLOT_TTL_SECS: u64 = 3600;

#[async_trait]
pub trait UnseenCounterStore: Send + Sync {
    /// Bump the recipient's counter and return the new count.
    async fn increment(&self, recipient: &Identity, conversation_id: &str) -> Result<i64>;

    /// Current count, 0 when the key is absent.
    async fn get(&self, recipient: &Identity, conversation_id: &str) -> Result<i64>;

    /// Reset to zero ("seen" action by the owning recipient).
    async fn clear(&self, recipient: &Identity, conversation_id: &str) -> Result<()>;

    /// Claim the idempotency slot for counting this delivery.
    ///
    /// Returns `true` if this call claimed it — the caller may then
    /// increment. Returns `false` if the delivery was already counted.
    async fn mark_counted(
        &self,
        event: &MessageCreatedEvent,
        recipient: &Identity,
    ) -> Result<bool>;
}

fn counted_key(event: &MessageCreatedEvent, recipient: &Identity) -> String {
    format!(
        "unseen:counted:{}:{}:{}:{}:{}",
        event.conversation_id,
        event.sender_id,
        event.created_at.timestamp_millis(),
        recipient.role.as_str(),
        recipient.id
    )
}

#[derive(Clone)]
pub struct RedisUnseenStore {
    conn: ConnectionManager,
}

impl RedisUnseenStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UnseenCounterStore for RedisUnseenStore {
    async fn increment(&self, recipient: &Identity, conversation_id: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(recipient.unseen_key(conversation_id), 1).await?;
        Ok(count)
    }

    async fn get(&self, recipient: &Identity, conversation_id: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(recipient.unseen_key(conversation_id)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn clear(&self, recipient: &Identity, conversation_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(recipient.unseen_key(conversation_id))
            .await?;
        Ok(())
    }

    async fn mark_counted(
        &self,
        event: &MessageCreatedEvent,
        recipient: &Identity,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        // SET NX returns nil when the key already exists.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(counted_key(event, recipient))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(COUNTED_SLOT_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(claimed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use chrono::TimeZone;

    #[test]
    fn counted_key_pins_conversation_sender_timestamp_and_recipient() {
        let event = MessageCreatedEvent {
            conversation_id: "c1".to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::User,
            content: "hi".to_string(),
            created_at: chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        let recipient = Identity::new(Role::Seller, "2");
        assert_eq!(
            counted_key(&event, &recipient),
            "unseen:counted:c1:1:1700000000123:seller:2"
        );
    }
}
