use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    conversation::{
        conversation_dto::{
            ConversationSummary, CreateConversationRequest, PaginatedResponse,
        },
        conversation_models::{Conversation, MessageResponse},
    },
    error::{AppError, Result},
    identity::{Identity, Role},
    middleware::AuthIdentity,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    page: Option<u32>,
}

/// Create the 1:1 conversation between a buyer and a seller, or
/// return the existing one.
#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = Conversation),
        (status = 200, description = "Conversation already existed", body = Conversation),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing or invalid identity")
    )
)]
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    // The caller must be one of the two parties.
    let is_party = match identity.role {
        Role::User => identity.id == payload.user_id,
        Role::Seller => identity.id == payload.seller_id,
    };
    if !is_party {
        return Err(AppError::Forbidden(
            "Cannot open a conversation for other identities".to_string(),
        ));
    }

    let (conversation, created) = state
        .conversation_repository
        .find_or_create_direct(&payload.user_id, &payload.seller_id)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(conversation)))
}

/// The caller's conversation list with last-message preview,
/// counterpart presence and unseen counts.
#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    responses(
        (status = 200, description = "Caller's conversations", body = [ConversationSummary]),
        (status = 401, description = "Missing or invalid identity")
    )
)]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
) -> Result<Json<Vec<ConversationSummary>>> {
    let rows = state
        .conversation_repository
        .list_for_identity(&identity)
        .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let counterpart = match identity.role {
            Role::User => row.seller_id.map(|id| Identity::new(Role::Seller, id)),
            Role::Seller => row.user_id.map(|id| Identity::new(Role::User, id)),
        };
        let Some(counterpart) = counterpart else {
            continue;
        };

        // Presence and counters are display hints; absent on error.
        let counterpart_online = state
            .presence
            .is_online(&counterpart)
            .await
            .unwrap_or(false);
        let unseen_count = state
            .counters
            .get(&identity, &row.conversation_id)
            .await
            .unwrap_or(0);

        summaries.push(ConversationSummary {
            conversation_id: row.conversation_id,
            counterpart_id: counterpart.id,
            counterpart_role: counterpart.role,
            counterpart_online,
            last_message: row.last_message,
            last_message_at: row.last_message_at,
            unseen_count,
        });
    }

    Ok(Json(summaries))
}

/// Paginated message history, newest first, fixed page size.
///
/// Fetching the first page is the REST analogue of `MARK_AS_SEEN`:
/// the caller just opened the conversation, so their unseen counter
/// for it is cleared.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    tag = "conversations",
    params(
        ("conversation_id" = String, Path, description = "Conversation to fetch"),
        ("page" = Option<u32>, Query, description = "Page number (default: 1)")
    ),
    responses(
        (status = 200, description = "Paginated message history", body = PaginatedResponse<MessageResponse>),
        (status = 401, description = "Missing or invalid identity"),
        (status = 403, description = "Caller is not a participant")
    )
)]
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<PaginatedResponse<MessageResponse>>> {
    if !state
        .conversation_repository
        .is_member(&conversation_id, &identity)
        .await?
    {
        return Err(AppError::Forbidden(
            "Not a participant of this conversation".to_string(),
        ));
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = state.config.history_page_size;
    let offset = ((page - 1) as i64) * (limit as i64);

    let messages = state
        .conversation_repository
        .find_messages(&conversation_id, limit as i64, offset)
        .await?;
    let total = state
        .conversation_repository
        .count_messages(&conversation_id)
        .await?;

    if page == 1 {
        if let Err(e) = state.counters.clear(&identity, &conversation_id).await {
            tracing::warn!(
                "Failed to clear unseen count for {} in {}: {}",
                identity,
                conversation_id,
                e
            );
        }
    }

    let total_pages = ((total as f64) / (limit as f64)).ceil() as u32;
    Ok(Json(PaginatedResponse {
        data: messages.into_iter().map(MessageResponse::from).collect(),
        total,
        page,
        limit,
        total_pages,
    }))
}
