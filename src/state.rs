use std::sync::Arc;

use crate::{
    conversation::ConversationRepository,
    presence::PresenceStore,
    unseen::UnseenCounterStore,
    websocket::{ChatRouter, ConnectionManager},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionManager,
    pub presence: Arc<dyn PresenceStore>,
    pub counters: Arc<dyn UnseenCounterStore>,
    pub conversation_repository: ConversationRepository,
    pub router: ChatRouter,
}

#[derive(Clone)]
pub struct Config {
    pub redis_url: String,
    pub nats_url: String,
    pub flush_interval_ms: u64,
    pub presence_ttl_secs: u64,
    pub history_page_size: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            nats_url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            flush_interval_ms: std::env::var("FLUSH_INTERVAL_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("FLUSH_INTERVAL_MS must be a number"),
            presence_ttl_secs: std::env::var("PRESENCE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .expect("PRESENCE_TTL_SECS must be a number"),
            history_page_size: std::env::var("HISTORY_PAGE_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .expect("HISTORY_PAGE_SIZE must be a number"),
        }
    }
}
