pub mod batch_consumer;
pub mod batch_state;
pub mod log_subscriber;

pub use batch_consumer::{BatchConsumer, MessageStore};
pub use batch_state::{BatchState, FlushState};
pub use log_subscriber::run_log_subscriber;
