//! Flush state machine for the batch persistence consumer.
//!
//! Pure and synchronous so every transition is testable without
//! timers. The async driver (`batch_consumer`) owns the single flush
//! deadline; this struct tells it when to arm one.
//!
//! ```text
//!            push (arm)                  begin_flush
//!   Idle ───────────────► Buffering ───────────────► Flushing
//!    ▲                        ▲                        │  │
//!    │  complete (empty)      │ begin_flush            │  │ fail_flush (re-arm)
//!    └────────────────────────┼────────────◄───────────┘  ▼
//!                             │                      RetryScheduled
//!                             └──(complete, non-empty: re-arm)
//! ```
//!
//! The timer is armed only on Idle→Buffering, on flush failure, and on
//! completion with arrivals that landed mid-flush. Two live timers for
//! the same buffer can therefore never coexist.

use std::collections::VecDeque;

use crate::events::MessageCreatedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No pending items, no timer.
    Idle,
    /// Items pending, one timer armed.
    Buffering,
    /// Drain + write in progress; no timer.
    Flushing,
    /// Last write failed; drained batch re-queued, retry timer armed.
    RetryScheduled,
}

pub struct BatchState {
    buffer: VecDeque<MessageCreatedEvent>,
    state: FlushState,
}

impl BatchState {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            state: FlushState::Idle,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer one event. Returns `true` when the caller must arm the
    /// flush timer — only on the first item landing in an Idle buffer.
    /// Later arrivals never reset the running timer, which bounds
    /// worst-case persistence latency regardless of burst size.
    pub fn push(&mut self, event: MessageCreatedEvent) -> bool {
        self.buffer.push_back(event);
        match self.state {
            FlushState::Idle => {
                self.state = FlushState::Buffering;
                true
            }
            // Buffering: timer already armed. Flushing: the completion
            // path arms the next one. RetryScheduled: retry timer runs.
            FlushState::Buffering | FlushState::Flushing | FlushState::RetryScheduled => false,
        }
    }

    /// Atomically drain the entire buffer for one bulk write.
    pub fn begin_flush(&mut self) -> Vec<MessageCreatedEvent> {
        self.state = FlushState::Flushing;
        self.buffer.drain(..).collect()
    }

    /// The bulk write succeeded. Returns `true` when a new timer must
    /// be armed for events that arrived while the flush ran.
    pub fn complete_flush(&mut self) -> bool {
        if self.buffer.is_empty() {
            self.state = FlushState::Idle;
            false
        } else {
            self.state = FlushState::Buffering;
            true
        }
    }

    /// The bulk write failed: put the drained batch back in front of
    /// anything that arrived meanwhile, preserving conversation order.
    /// The caller arms the retry timer.
    pub fn fail_flush(&mut self, batch: Vec<MessageCreatedEvent>) {
        for event in batch.into_iter().rev() {
            self.buffer.push_front(event);
        }
        self.state = FlushState::RetryScheduled;
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use chrono::Utc;

    fn event(conversation_id: &str, content: &str) -> MessageCreatedEvent {
        MessageCreatedEvent {
            conversation_id: conversation_id.to_string(),
            sender_id: "1".to_string(),
            sender_type: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_first_push_arms_the_timer() {
        let mut state = BatchState::new();
        assert!(state.push(event("c1", "a")));
        assert_eq!(state.state(), FlushState::Buffering);
        assert!(!state.push(event("c1", "b")));
        assert!(!state.push(event("c2", "c")));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn begin_flush_drains_everything_in_arrival_order() {
        let mut state = BatchState::new();
        state.push(event("c1", "a"));
        state.push(event("c1", "b"));
        state.push(event("c1", "c"));

        let batch = state.begin_flush();
        assert_eq!(state.state(), FlushState::Flushing);
        assert!(state.is_empty());
        let contents: Vec<_> = batch.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"]);
    }

    #[test]
    fn complete_flush_goes_idle_when_nothing_arrived() {
        let mut state = BatchState::new();
        state.push(event("c1", "a"));
        let _ = state.begin_flush();
        assert!(!state.complete_flush());
        assert_eq!(state.state(), FlushState::Idle);
    }

    #[test]
    fn complete_flush_rearms_for_mid_flush_arrivals() {
        let mut state = BatchState::new();
        state.push(event("c1", "a"));
        let _ = state.begin_flush();
        // Arrival while the write is in progress: no timer of its own.
        assert!(!state.push(event("c1", "b")));
        // Completion notices it and asks for one.
        assert!(state.complete_flush());
        assert_eq!(state.state(), FlushState::Buffering);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn failed_flush_requeues_batch_ahead_of_new_arrivals() {
        let mut state = BatchState::new();
        state.push(event("c1", "a"));
        state.push(event("c1", "b"));
        let batch = state.begin_flush();
        state.push(event("c1", "c"));

        state.fail_flush(batch);
        assert_eq!(state.state(), FlushState::RetryScheduled);

        let retry = state.begin_flush();
        let contents: Vec<_> = retry.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"], "no loss, order preserved");
    }

    #[test]
    fn push_during_retry_window_does_not_arm_second_timer() {
        let mut state = BatchState::new();
        state.push(event("c1", "a"));
        let batch = state.begin_flush();
        state.fail_flush(batch);
        assert!(!state.push(event("c1", "b")));
        assert_eq!(state.state(), FlushState::RetryScheduled);
    }
}
