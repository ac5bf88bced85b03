//! TTL-backed presence tracking.
//!
//! Presence is pure key existence: `online:<role>:<id>` is set with a
//! TTL on registration and deleted on clean disconnect. The TTL is a
//! dead-connection reaper — a socket that dies without a close frame
//! stops looking online once the TTL lapses. Lookups make no
//! distinction between "never connected" and "timed out".

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::{error::Result, identity::Identity};

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record the identity as online for one TTL window.
    async fn mark_online(&self, identity: &Identity) -> Result<()>;

    /// Delete the presence key immediately (clean disconnect).
    async fn mark_offline(&self, identity: &Identity) -> Result<()>;

    /// Key absent means offline.
    async fn is_online(&self, identity: &Identity) -> Result<bool>;
}

#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisPresenceStore {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn mark_online(&self, identity: &Identity) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(identity.presence_key(), "1", self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn mark_offline(&self, identity: &Identity) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(identity.presence_key()).await?;
        Ok(())
    }

    async fn is_online(&self, identity: &Identity) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(identity.presence_key()).await?;
        Ok(exists)
    }
}
