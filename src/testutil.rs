//! In-memory doubles for the store and publisher seams, shared by the
//! router and consumer test suites.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::{
    consumer::MessageStore,
    error::{AppError, Result},
    events::{EventPublisher, MessageCreatedEvent},
    identity::Identity,
    presence::PresenceStore,
    unseen::UnseenCounterStore,
};

/// Records published events instead of appending to NATS.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<MessageCreatedEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_message_created(&self, event: &MessageCreatedEvent) -> Result<()> {
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Presence store over a plain set of presence keys.
#[derive(Default)]
pub struct InMemoryPresenceStore {
    online: Mutex<HashSet<String>>,
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn mark_online(&self, identity: &Identity) -> Result<()> {
        self.online.lock().unwrap().insert(identity.presence_key());
        Ok(())
    }

    async fn mark_offline(&self, identity: &Identity) -> Result<()> {
        self.online.lock().unwrap().remove(&identity.presence_key());
        Ok(())
    }

    async fn is_online(&self, identity: &Identity) -> Result<bool> {
        Ok(self
            .online
            .lock()
            .unwrap()
            .contains(&identity.presence_key()))
    }
}

/// Counter store over plain maps, including the idempotency slots.
#[derive(Default)]
pub struct InMemoryCounterStore {
    counts: Mutex<HashMap<String, i64>>,
    counted: Mutex<HashSet<String>>,
}

impl InMemoryCounterStore {
    pub fn count_for(&self, recipient: &Identity, conversation_id: &str) -> i64 {
        self.counts
            .lock()
            .unwrap()
            .get(&recipient.unseen_key(conversation_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl UnseenCounterStore for InMemoryCounterStore {
    async fn increment(&self, recipient: &Identity, conversation_id: &str) -> Result<i64> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts
            .entry(recipient.unseen_key(conversation_id))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get(&self, recipient: &Identity, conversation_id: &str) -> Result<i64> {
        Ok(self.count_for(recipient, conversation_id))
    }

    async fn clear(&self, recipient: &Identity, conversation_id: &str) -> Result<()> {
        self.counts
            .lock()
            .unwrap()
            .remove(&recipient.unseen_key(conversation_id));
        Ok(())
    }

    async fn mark_counted(
        &self,
        event: &MessageCreatedEvent,
        recipient: &Identity,
    ) -> Result<bool> {
        let key = format!(
            "{}:{}:{}:{}",
            event.conversation_id,
            event.sender_id,
            event.created_at.timestamp_millis(),
            recipient
        );
        Ok(self.counted.lock().unwrap().insert(key))
    }
}

/// Message store that records each batch; can be told to fail the
/// first N insert attempts to exercise the retry path.
#[derive(Default)]
pub struct RecordingMessageStore {
    pub batches: Mutex<Vec<Vec<MessageCreatedEvent>>>,
    pub failures_remaining: Mutex<u32>,
    pub recipients: Mutex<HashMap<String, Vec<Identity>>>,
}

impl RecordingMessageStore {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: Mutex::new(times),
            ..Default::default()
        }
    }

    pub fn with_recipients(self, conversation_id: &str, recipients: Vec<Identity>) -> Self {
        self.recipients
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), recipients);
        self
    }
}

#[async_trait]
impl MessageStore for RecordingMessageStore {
    async fn insert_batch(&self, batch: &[MessageCreatedEvent]) -> Result<()> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Internal("simulated insert failure".to_string()));
            }
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn recipients_of(
        &self,
        conversation_id: &str,
        _sender: &Identity,
    ) -> Result<Vec<Identity>> {
        Ok(self
            .recipients
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
