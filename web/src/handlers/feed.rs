//! WebSocket change feed.
//!
//! Each connection holds exactly one [`Subscription`]. Authorization happens
//! before the upgrade, so a rejected caller gets a plain HTTP error.
//!
//! # Architecture
//!
//! ```text
//! Client          Feed Handler             ChangeFeed
//!   │                  │                       │
//!   ├─ Upgrade ───────>│                       │
//!   │                  ├─ service.subscribe() >│
//!   │<─ subscribed ────┤                       │
//!   │                  │<── ChangeEvent ───────┤
//!   │<─ event ─────────┤                       │
//!   ├─ Close ─────────>│                       │
//!   │                  ├─ drop (close) ───────>│
//! ```
//!
//! # Message Protocol
//!
//! **Server → Client (Confirmation):**
//! ```json
//! {"type": "subscribed", "key": {"key": "request", "request_id": "..."}}
//! ```
//!
//! **Server → Client (Event):**
//! ```json
//! {"type": "event", "event": {"kind": "updated", "version": 3, "was_unclaimed": false, "request": {...}}}
//! ```
//!
//! **Server → Client (Access lost, last message):**
//! ```json
//! {"type": "revoked", "key": {"key": "request", "request_id": "..."}}
//! ```
//!
//! Events carry full post-write state; clients keep the highest version per
//! request. Messages from the client other than `Close` are ignored.

use crate::{AppError, AppState, CurrentPrincipal, ValidPath};
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use curare_core::ids::CareRequestId;
use curare_runtime::{ChangeEvent, FeedKey, Subscription};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Server-to-client feed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    /// The subscription is open.
    Subscribed {
        /// What the connection watches.
        key: FeedKey,
    },
    /// An accepted write.
    Event {
        /// Full post-write state.
        event: ChangeEvent,
    },
    /// The caller can no longer read the watched request. The server closes
    /// the socket after this message.
    Revoked {
        /// The key that was closed.
        key: FeedKey,
    },
}

/// Watch one request.
///
/// ```text
/// GET /api/feed/requests/:id
/// ```
///
/// # Errors
///
/// 401, 403 (not visible to the caller), 404, 503.
pub async fn request(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    open(state, principal, FeedKey::Request(id), ws).await
}

/// Watch requests entering and leaving the unclaimed pool.
///
/// ```text
/// GET /api/feed/unclaimed
/// ```
///
/// # Errors
///
/// 401, 403 (patients).
pub async fn unclaimed(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    open(state, principal, FeedKey::AllUnclaimed, ws).await
}

/// Watch every request.
///
/// ```text
/// GET /api/feed/all
/// ```
///
/// # Errors
///
/// 401, 403 (not an admin).
pub async fn all(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    open(state, principal, FeedKey::All, ws).await
}

async fn open(
    state: AppState,
    principal: CurrentPrincipal,
    key: FeedKey,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let subscription = state.service.subscribe(principal.as_ref(), key).await?;
    info!(%key, "Change feed connection opened");
    Ok(ws.on_upgrade(move |socket| serve(socket, subscription)))
}

/// Forward events until either side goes away.
///
/// Dropping the send task drops the subscription, which releases the channel.
async fn serve(socket: WebSocket, mut subscription: Subscription) {
    let key = subscription.key();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        if send(&mut sender, &FeedMessage::Subscribed { key }).await.is_err() {
            return;
        }
        while let Some(event) = subscription.recv().await {
            if send(&mut sender, &FeedMessage::Event { event }).await.is_err() {
                // Client disconnected
                return;
            }
        }
        if subscription.is_revoked() {
            let _ = send(&mut sender, &FeedMessage::Revoked { key }).await;
            let _ = sender.send(Message::Close(None)).await;
        }
        debug!(%key, "Feed send task terminated");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(%key, "Change feed connection closed");
}

async fn send<S>(sender: &mut S, message: &FeedMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize feed message");
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
