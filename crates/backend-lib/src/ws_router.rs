// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! HTTP router and WebSocket connection handling.
use crate::error::AppError;
use crate::handlers::{live, messages, presence};
use crate::middleware::{bearer_token, rate_limit, require_auth};
use crate::storage::Storage;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use stagescout_common::{ServerToClient, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

/// How long a closing connection may spend flushing queued replies
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the application router
pub fn create_router<S: Storage + Clone + 'static>(state: Arc<AppState<S>>) -> Router {
    let api = Router::new()
        .route(
            "/messages/conversations",
            post(messages::new_conversation::<S>).get(messages::get_conversations::<S>),
        )
        .route("/messages", post(messages::add_message::<S>))
        .route("/messages/{conversation_id}", get(messages::get_messages::<S>))
        .route("/presence", get(presence::online_users::<S>))
        .route_layer(from_fn_with_state(state.clone(), require_auth::<S>))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::<S>));

    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health_handler))
        .nest("/api", api)
        .fallback(not_found)
        .layer(cors_layer(&state.settings.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    info!("CORS allowing connections from: {}", allowed_origins.join(", "));

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "Healthy"
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "message": "API route not found" })),
    )
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Bearer token, for clients that cannot set headers on upgrade
    token: Option<String>,
}

/// Handler for WebSocket upgrades.
///
/// A token is optional; a token that is present but invalid is refused.
async fn ws_handler<S: Storage + Clone + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let token = params.token.as_deref().or_else(|| bearer_token(&headers));

    let authenticated = match token.map(|t| state.auth.verify(t)) {
        Some(Ok(user)) => Some(user.user_id),
        Some(Err(e)) => {
            debug!("websocket upgrade with bad token: {e}");
            return AppError::Auth("Not authorized, token failed".to_string()).into_response();
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, authenticated))
}

async fn handle_connection<S: Storage + Clone + 'static>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    authenticated: Option<UserId>,
) {
    let connection_id = Uuid::new_v4();
    let (mut tx, mut rx) = socket.split();

    // Everything bound for this client goes through one bounded queue
    let (out_tx, mut out_rx) =
        mpsc::channel::<ServerToClient>(state.settings.presence.outbound_buffer);

    // Forward queued messages to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message: {e}");
                    continue;
                },
            };
            if tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = state.presence.connect(connection_id, out_tx.clone()).await {
        error!(%connection_id, "could not register connection: {e}");
        send_task.abort();
        return;
    }

    let ctx = live::ConnectionContext {
        connection_id,
        authenticated,
        enforce_identity: state.settings.auth.enforce_identity,
    };
    info!(%connection_id, authenticated = ?ctx.authenticated, "websocket connected");

    while let Some(frame) = rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                match live::handle_frame(text.as_str(), &ctx, &state.presence).await {
                    Ok(Some(reply)) => {
                        if out_tx.send(reply).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => {
                        error!(%connection_id, "presence unavailable: {e}");
                        break;
                    },
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(%connection_id, "websocket error: {e}");
                break;
            },
        }
    }

    // Transport is gone, however it ended
    if let Err(e) = state.presence.disconnect(connection_id).await {
        error!(%connection_id, "could not unregister connection: {e}");
    }
    info!(%connection_id, "websocket disconnected");

    if !flush_writer(out_tx, send_task, WRITER_FLUSH_TIMEOUT).await {
        debug!(%connection_id, "writer did not flush in time");
    }
}

/// Close a connection's outbound queue and let its writer drain what is
/// already queued. The writer is aborted if it is still running after
/// `timeout`. Returns whether it finished on its own.
///
/// The presence actor drops its sender on disconnect, so `out_tx` must be
/// the last one left.
async fn flush_writer(
    out_tx: mpsc::Sender<ServerToClient>,
    writer: JoinHandle<()>,
    timeout: Duration,
) -> bool {
    drop(out_tx);
    let abort = writer.abort_handle();
    match tokio::time::timeout(timeout, writer).await {
        Ok(_) => true,
        Err(_) => {
            abort.abort();
            false
        },
    }
}
