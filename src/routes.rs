use crate::{
    conversation::{
        conversation_dto::{ConversationSummary, CreateConversationRequest},
        conversation_handlers,
        conversation_models::{Conversation, Message, MessageResponse},
    },
    middleware::identity_middleware,
    state::AppState,
    websocket::handler::ws_handler,
};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, Method,
};
use axum::{
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::conversation::conversation_handlers::create_conversation,
        crate::conversation::conversation_handlers::list_conversations,
        crate::conversation::conversation_handlers::get_conversation_messages,
    ),
    components(schemas(
        CreateConversationRequest,
        Conversation,
        ConversationSummary,
        Message,
        MessageResponse,
    )),
    tags(
        (name = "conversations", description = "Conversation and message history endpoints")
    )
)]
struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-identity"),
        ]);

    let api_routes = Router::new()
        .route(
            "/api/conversations",
            get(conversation_handlers::list_conversations)
                .post(conversation_handlers::create_conversation),
        )
        .route(
            "/api/conversations/:conversation_id/messages",
            get(conversation_handlers::get_conversation_messages),
        )
        .route_layer(middleware::from_fn(identity_middleware));

    Router::new()
        .merge(api_routes)
        // Gateway socket: identity arrives in the registration frame,
        // not through the REST identity middleware.
        .route("/ws/chat", get(ws_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
