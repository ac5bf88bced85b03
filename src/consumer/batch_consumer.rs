//! Batched persistence of chat messages.
//!
//! Runs decoupled from the gateway: events come off the durable log,
//! sit in a FIFO buffer, and get written to Postgres in one bulk
//! insert when the flush timer fires. Persistence may lag live
//! delivery by up to one flush interval — an accepted trade-off for
//! write throughput. A failed write never discards the batch; the
//! whole thing is retried after the same interval (at-least-once).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{
    consumer::batch_state::BatchState,
    error::Result,
    events::MessageCreatedEvent,
    identity::Identity,
    unseen::UnseenCounterStore,
};

/// Durable storage the consumer flushes into.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Write the whole batch in one bulk insert.
    async fn insert_batch(&self, batch: &[MessageCreatedEvent]) -> Result<()>;

    /// Conversation participants other than the sender.
    async fn recipients_of(
        &self,
        conversation_id: &str,
        sender: &Identity,
    ) -> Result<Vec<Identity>>;
}

pub struct BatchConsumer {
    store: Arc<dyn MessageStore>,
    counters: Arc<dyn UnseenCounterStore>,
    flush_interval: Duration,
}

impl BatchConsumer {
    pub fn new(
        store: Arc<dyn MessageStore>,
        counters: Arc<dyn UnseenCounterStore>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            counters,
            flush_interval,
        }
    }

    /// Drive the buffer until the inbound channel closes.
    ///
    /// At most one flush deadline exists at any point: it is armed
    /// only when `BatchState` asks for it and cleared before every
    /// flush begins, so duplicate concurrent flushes cannot happen.
    pub async fn run(self, mut rx: mpsc::Receiver<MessageCreatedEvent>) {
        let mut state = BatchState::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => {
                        if state.push(event) {
                            deadline = Some(Instant::now() + self.flush_interval);
                        }
                    }
                    None => {
                        // Shutdown: one best-effort flush of what's left.
                        if !state.is_empty() {
                            self.flush(&mut state).await;
                        }
                        break;
                    }
                },
                _ = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    deadline = None;
                    if self.flush(&mut state).await {
                        deadline = Some(Instant::now() + self.flush_interval);
                    }
                }
            }
        }
    }

    /// Drain + bulk write. Returns whether a new timer must be armed
    /// (retry, or arrivals that landed during the write).
    async fn flush(&self, state: &mut BatchState) -> bool {
        let batch = state.begin_flush();
        if batch.is_empty() {
            return state.complete_flush();
        }

        match self.store.insert_batch(&batch).await {
            Ok(()) => {
                tracing::info!("Flushed {} buffered messages", batch.len());
                self.bump_counters(&batch).await;
                state.complete_flush()
            }
            Err(e) => {
                tracing::error!(
                    "Batch insert of {} messages failed, retrying in {:?}: {}",
                    batch.len(),
                    self.flush_interval,
                    e
                );
                state.fail_flush(batch);
                true
            }
        }
    }

    /// Post-flush counter updates, best-effort.
    ///
    /// The idempotency slot makes this a no-op for deliveries the
    /// router already counted and for batches re-flushed after a
    /// partial failure — retries can never double-count.
    async fn bump_counters(&self, batch: &[MessageCreatedEvent]) {
        for event in batch {
            let sender = Identity::new(event.sender_type, event.sender_id.clone());
            let recipients = match self
                .store
                .recipients_of(&event.conversation_id, &sender)
                .await
            {
                Ok(recipients) => recipients,
                Err(e) => {
                    tracing::warn!(
                        "Failed to resolve recipients for {}: {}",
                        event.conversation_id,
                        e
                    );
                    continue;
                }
            };

            for recipient in recipients {
                match self.counters.mark_counted(event, &recipient).await {
                    Ok(true) => {
                        if let Err(e) = self
                            .counters
                            .increment(&recipient, &event.conversation_id)
                            .await
                        {
                            tracing::warn!("Unseen counter update failed for {}: {}", recipient, e);
                        }
                    }
                    Ok(false) => {} // already counted at delivery time
                    Err(e) => {
                        tracing::warn!("Idempotency check failed for {}: {}", recipient, e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::testutil::{InMemoryCounterStore, RecordingMessageStore};
    use chrono::Utc;

    const FLUSH: Duration = Duration::from_millis(3000);

    fn event(conversation_id: &str, content: &str) -> MessageCreatedEvent {
        MessageCreatedEvent {
            conversation_id: conversation_id.to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn spawn_consumer(
        store: Arc<RecordingMessageStore>,
        counters: Arc<InMemoryCounterStore>,
    ) -> (
        mpsc::Sender<MessageCreatedEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let consumer = BatchConsumer::new(store, counters, FLUSH);
        (tx, tokio::spawn(consumer.run(rx)))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_interval_is_a_single_batch() {
        let store = Arc::new(RecordingMessageStore::default());
        let counters = Arc::new(InMemoryCounterStore::default());
        let (tx, handle) = spawn_consumer(store.clone(), counters);

        // Three messages for c2 within 100ms against a 3000ms interval.
        for content in ["one", "two", "three"] {
            tx.send(event("c2", content)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(3500)).await;

        {
            let batches = store.batches.lock().unwrap();
            assert_eq!(batches.len(), 1, "exactly one bulk insert");
            assert_eq!(batches[0].len(), 3);
        }

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_retries_with_nothing_lost() {
        let store = Arc::new(
            RecordingMessageStore::failing(1)
                .with_recipients("c1", vec![Identity::new(Role::Seller, "9")]),
        );
        let counters = Arc::new(InMemoryCounterStore::default());
        let (tx, handle) = spawn_consumer(store.clone(), counters.clone());

        tx.send(event("c1", "a")).await.unwrap();
        tx.send(event("c1", "b")).await.unwrap();
        // First attempt at ~3000ms fails; land one more while the
        // retry window runs.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(event("c1", "c")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3000)).await;

        {
            let batches = store.batches.lock().unwrap();
            assert_eq!(batches.len(), 1, "only the successful attempt records");
            let contents: Vec<_> = batches[0].iter().map(|e| e.content.as_str()).collect();
            assert_eq!(contents, ["a", "b", "c"], "retry keeps prior items first");
        }

        // Counters caught up after the successful flush.
        let seller = Identity::new(Role::Seller, "9");
        assert_eq!(counters.count_for(&seller, "c1"), 3);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_counted_by_the_router_are_not_counted_again() {
        let recipient = Identity::new(Role::Seller, "2");
        let store = Arc::new(
            RecordingMessageStore::default().with_recipients("c1", vec![recipient.clone()]),
        );
        let counters = Arc::new(InMemoryCounterStore::default());

        // The router claimed this delivery's idempotency slot already.
        let counted = event("c1", "hi");
        counters.mark_counted(&counted, &recipient).await.unwrap();

        let (tx, handle) = spawn_consumer(store.clone(), counters.clone());
        tx.send(counted).await.unwrap();
        tx.send(event("c1", "uncounted")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Only the event the router never saw gets counted here.
        assert_eq!(counters.count_for(&recipient, "c1"), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn messages_after_a_flush_start_a_new_batch() {
        let store = Arc::new(RecordingMessageStore::default());
        let counters = Arc::new(InMemoryCounterStore::default());
        let (tx, handle) = spawn_consumer(store.clone(), counters);

        tx.send(event("c1", "first")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(event("c1", "second")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].content, "first");
        assert_eq!(batches[1][0].content, "second");
        drop(batches);

        drop(tx);
        handle.await.unwrap();
    }
}
