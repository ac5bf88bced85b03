use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    consumer::MessageStore,
    conversation::{
        conversation_dto::ConversationListRow,
        conversation_models::{Conversation, Message, Participant},
    },
    error::Result,
    events::MessageCreatedEvent,
    identity::{Identity, Role},
};

/// Canonical pair key for a 1:1 conversation. Role prefixes keep a
/// user and a seller with the same raw id from colliding.
fn direct_key(user_id: &str, seller_id: &str) -> String {
    format!("user:{user_id}|seller:{seller_id}")
}

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the 1:1 conversation between a buyer and a seller, or
    /// create it (first contact). Returns the conversation and whether
    /// it was created by this call.
    ///
    /// Concurrent first-contact requests for the same pair race to the
    /// unique `direct_key` index; the loser's insert returns no row and
    /// falls back to selecting the winner's conversation.
    pub async fn find_or_create_direct(
        &self,
        user_id: &str,
        seller_id: &str,
    ) -> Result<(Conversation, bool)> {
        let key = direct_key(user_id, seller_id);

        let existing =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE direct_key = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(conversation) = existing {
            return Ok((conversation, false));
        }

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, is_group, direct_key) VALUES ($1, false, $2)
             ON CONFLICT (direct_key) DO NOTHING
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await?;

        let conversation = match inserted {
            Some(conversation) => conversation,
            None => {
                // Lost the race; the winner committed the pair.
                tx.rollback().await?;
                let conversation = sqlx::query_as::<_, Conversation>(
                    "SELECT * FROM conversations WHERE direct_key = $1",
                )
                .bind(&key)
                .fetch_one(&self.pool)
                .await?;
                return Ok((conversation, false));
            }
        };

        sqlx::query("INSERT INTO participants (conversation_id, user_id) VALUES ($1, $2)")
            .bind(&conversation.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO participants (conversation_id, seller_id) VALUES ($1, $2)")
            .bind(&conversation.id)
            .bind(seller_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((conversation, true))
    }

    /// The caller's conversations, newest activity first, with the
    /// latest message preview joined in.
    pub async fn list_for_identity(&self, identity: &Identity) -> Result<Vec<ConversationListRow>> {
        let sql = match identity.role {
            Role::User => {
                "SELECT c.id AS conversation_id,
                        pu.user_id,
                        ps.seller_id,
                        lm.content AS last_message,
                        lm.created_at AS last_message_at
                 FROM conversations c
                 JOIN participants me ON me.conversation_id = c.id AND me.user_id = $1
                 JOIN participants pu ON pu.conversation_id = c.id AND pu.user_id IS NOT NULL
                 JOIN participants ps ON ps.conversation_id = c.id AND ps.seller_id IS NOT NULL
                 LEFT JOIN LATERAL (
                     SELECT content, created_at FROM messages m
                     WHERE m.conversation_id = c.id
                     ORDER BY m.created_at DESC
                     LIMIT 1
                 ) lm ON true
                 WHERE c.is_group = false
                 ORDER BY lm.created_at DESC NULLS LAST"
            }
            Role::Seller => {
                "SELECT c.id AS conversation_id,
                        pu.user_id,
                        ps.seller_id,
                        lm.content AS last_message,
                        lm.created_at AS last_message_at
                 FROM conversations c
                 JOIN participants me ON me.conversation_id = c.id AND me.seller_id = $1
                 JOIN participants pu ON pu.conversation_id = c.id AND pu.user_id IS NOT NULL
                 JOIN participants ps ON ps.conversation_id = c.id AND ps.seller_id IS NOT NULL
                 LEFT JOIN LATERAL (
                     SELECT content, created_at FROM messages m
                     WHERE m.conversation_id = c.id
                     ORDER BY m.created_at DESC
                     LIMIT 1
                 ) lm ON true
                 WHERE c.is_group = false
                 ORDER BY lm.created_at DESC NULLS LAST"
            }
        };

        let rows = sqlx::query_as::<_, ConversationListRow>(sql)
            .bind(&identity.id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Conversation access requires membership in the participant set.
    pub async fn is_member(&self, conversation_id: &str, identity: &Identity) -> Result<bool> {
        let sql = match identity.role {
            Role::User => {
                "SELECT EXISTS(
                     SELECT 1 FROM participants
                     WHERE conversation_id = $1 AND user_id = $2
                 )"
            }
            Role::Seller => {
                "SELECT EXISTS(
                     SELECT 1 FROM participants
                     WHERE conversation_id = $1 AND seller_id = $2
                 )"
            }
        };

        let exists: bool = sqlx::query_scalar(sql)
            .bind(conversation_id)
            .bind(&identity.id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    pub async fn find_messages(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    pub async fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn participants_of(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(
            "SELECT conversation_id, user_id, seller_id FROM participants
             WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }
}

#[async_trait]
impl MessageStore for ConversationRepository {
    async fn insert_batch(&self, batch: &[MessageCreatedEvent]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // One bulk insert per flush; the whole batch succeeds or the
        // whole batch is retried by the consumer.
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO messages (conversation_id, sender_id, sender_role, content, created_at) ",
        );
        builder.push_values(batch, |mut row, event| {
            row.push_bind(&event.conversation_id)
                .push_bind(&event.sender_id)
                .push_bind(event.sender_type.as_str())
                .push_bind(&event.content)
                .push_bind(event.created_at);
        });
        builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn recipients_of(
        &self,
        conversation_id: &str,
        sender: &Identity,
    ) -> Result<Vec<Identity>> {
        let recipients = self
            .participants_of(conversation_id)
            .await?
            .into_iter()
            .filter_map(|p| match (p.user_id, p.seller_id) {
                (Some(id), _) => Some(Identity::new(Role::User, id)),
                (_, Some(id)) => Some(Identity::new(Role::Seller, id)),
                _ => None,
            })
            .filter(|identity| identity != sender)
            .collect();

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_stable_per_pair() {
        assert_eq!(direct_key("7", "2"), "user:7|seller:2");
        assert_eq!(direct_key("7", "2"), direct_key("7", "2"));
    }

    #[test]
    fn direct_key_separates_roles_sharing_raw_ids() {
        // user 2 talking to seller 7 is not seller 2 talking to user 7
        assert_ne!(direct_key("2", "7"), direct_key("7", "2"));
    }
}
