pub mod event_publisher;

pub use event_publisher::{
    ensure_message_stream, EventPublisher, MessageCreatedEvent, NatsEventPublisher,
    MESSAGE_STREAM_NAME,
};
