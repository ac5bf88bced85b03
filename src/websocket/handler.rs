use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    identity::Identity,
    presence::PresenceStore,
    state::AppState,
    websocket::{
        connection::{ConnectionManager, WsSender},
        router::ChatRouter,
        types::{parse_frame, ControlFrame, Frame, ServerEvent},
    },
};

/// Chat gateway WebSocket handler.
///
/// Protocol: the first frame from a new connection is a bare identity
/// string (`seller_<id>` / `<id>`) registering the connection — not
/// JSON, not a chat message. Every later frame is JSON: a chat
/// message, a `MARK_AS_SEEN` control, or malformed (logged and
/// dropped; the socket stays open).
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection protocol state shared between the socket loop and
/// its tests. Owns the registration and cleanup side effects so they
/// can be exercised without a live socket.
#[derive(Clone)]
pub struct ChatSession {
    registry: ConnectionManager,
    presence: Arc<dyn PresenceStore>,
    router: ChatRouter,
}

impl ChatSession {
    pub fn new(
        registry: ConnectionManager,
        presence: Arc<dyn PresenceStore>,
        router: ChatRouter,
    ) -> Self {
        Self {
            registry,
            presence,
            router,
        }
    }

    pub async fn process_frame(
        &self,
        text: &str,
        conn_id: Uuid,
        registered: &mut Option<Identity>,
        tx: WsSender,
    ) {
        match parse_frame(text) {
            Frame::Registration(identity) => {
                if registered.is_some() {
                    // Only the first frame registers; later bare strings
                    // are noise from the client.
                    tracing::warn!("Dropping repeat registration frame from {}", identity);
                    return;
                }
                self.registry.add_connection(identity.clone(), conn_id, tx);
                if let Err(e) = self.presence.mark_online(&identity).await {
                    tracing::warn!("Failed to mark {} online: {}", identity, e);
                }
                tracing::info!("Registered chat connection for {}", identity);
                *registered = Some(identity);
            }
            Frame::Chat(frame) => {
                if registered.is_none() {
                    tracing::warn!("Dropping chat frame from unregistered connection");
                    return;
                }
                if let Err(e) = self.router.handle_chat(frame).await {
                    // Persistence retry is the log client's concern; the
                    // sender is never told synchronously.
                    tracing::error!("Failed to route chat frame: {}", e);
                }
            }
            Frame::Control(ControlFrame::MarkAsSeen { conversation_id }) => match registered {
                Some(identity) => {
                    if let Err(e) = self.router.handle_seen(identity, &conversation_id).await {
                        tracing::warn!("Failed to clear unseen count for {}: {}", identity, e);
                    }
                }
                None => tracing::warn!("Dropping MARK_AS_SEEN from unregistered connection"),
            },
            Frame::Malformed(reason) => {
                tracing::warn!("Dropping malformed frame: {}", reason);
            }
        }
    }

    /// Drop the registry entry and presence key immediately — the TTL
    /// reaper is only for sockets that die without closing. Skips both
    /// if a newer connection took over this identity.
    pub async fn close(&self, registered: Option<Identity>, conn_id: Uuid) {
        if let Some(identity) = registered {
            if self.registry.remove_connection(&identity, conn_id) {
                if let Err(e) = self.presence.mark_offline(&identity).await {
                    tracing::warn!("Failed to clear presence for {}: {}", identity, e);
                }
                tracing::info!("Chat WebSocket closed for {}", identity);
            }
        }
    }
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn_id = Uuid::new_v4();
    let session = ChatSession::new(
        state.registry.clone(),
        state.presence.clone(),
        state.router.clone(),
    );

    // Task: serialize pushes from the registry channel onto the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Frame handling must never block on a slow peer: everything it
    // awaits (redis, the log publish) is async I/O, and live delivery
    // goes through the non-blocking registry channel.
    let mut registered: Option<Identity> = None;
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                session
                    .process_frame(&text, conn_id, &mut registered, tx.clone())
                    .await;
            }
            Message::Close(_) => break,
            // Protocol-level ping/pong is answered by axum itself.
            _ => {}
        }
    }

    send_task.abort();
    session.close(registered, conn_id).await;
}
