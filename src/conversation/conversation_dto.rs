use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::identity::Role;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateConversationRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub seller_id: String,
}

/// One row of the caller's conversation list.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub counterpart_id: String,
    pub counterpart_role: Role,
    pub counterpart_online: bool,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unseen_count: i64,
}

/// Raw row backing `ConversationSummary`, before presence and unseen
/// counts are merged in from Redis.
#[derive(Debug, sqlx::FromRow)]
pub struct ConversationListRow {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub seller_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}
