pub mod unseen_store;

pub use unseen_store::{RedisUnseenStore, UnseenCounterStore};
