//! Durable-log subscription feeding the batch consumer.
//!
//! A durable JetStream pull consumer, so persistence resumes from the
//! last acked record across restarts. Records are acked on receipt:
//! the BufferedMessage contract accepts up to one flush interval of
//! loss on a crash, and acking after the flush would instead require
//! deduplicating redeliveries downstream.

use async_nats::jetstream::{self, consumer::pull};
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    error::{AppError, Result},
    events::{MessageCreatedEvent, MESSAGE_STREAM_NAME},
};

const DURABLE_CONSUMER_NAME: &str = "chat-persistence";

/// Forward decoded message-created events into the consumer channel
/// until the stream or the channel closes.
pub async fn run_log_subscriber(
    jetstream: jetstream::Context,
    tx: mpsc::Sender<MessageCreatedEvent>,
) -> Result<()> {
    let stream = jetstream
        .get_stream(MESSAGE_STREAM_NAME)
        .await
        .map_err(|e| AppError::EventLog(format!("Failed to open message stream: {}", e)))?;

    let consumer = stream
        .get_or_create_consumer(
            DURABLE_CONSUMER_NAME,
            pull::Config {
                durable_name: Some(DURABLE_CONSUMER_NAME.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| AppError::EventLog(format!("Failed to create durable consumer: {}", e)))?;

    let mut messages = consumer
        .messages()
        .await
        .map_err(|e| AppError::EventLog(format!("Failed to subscribe: {}", e)))?;

    tracing::info!(
        "Persistence consumer '{}' listening on stream '{}'",
        DURABLE_CONSUMER_NAME,
        MESSAGE_STREAM_NAME
    );

    while let Some(next) = messages.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Log subscription error: {}", e);
                continue;
            }
        };

        match serde_json::from_slice::<MessageCreatedEvent>(&msg.payload) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    // Batch consumer gone; stop pulling.
                    break;
                }
            }
            Err(e) => {
                // A corrupt record must not wedge the stream.
                tracing::warn!("Dropping undecodable log record: {}", e);
            }
        }

        if let Err(e) = msg.ack().await {
            tracing::warn!("Failed to ack log record: {}", e);
        }
    }

    Ok(())
}
