//! Shared setup for the backend integration tests.
#![allow(dead_code)]

use backend_lib::{config::Settings, storage::FlatFileStorage, ws_router, AppState};
use futures_util::StreamExt;
use stagescout_common::ServerToClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings pointing at a fresh temporary data directory
pub fn test_settings(temp_dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = temp_dir.path().to_path_buf();
    settings.auth.jwt_secret = "integration-secret".to_string();
    settings
}

/// Application state over flat files in a temporary directory.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub fn setup_state(
    configure: impl FnOnce(&mut Settings),
) -> (Arc<AppState<FlatFileStorage>>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = test_settings(&temp_dir);
    configure(&mut settings);
    let state = AppState::with_flat_files(&settings).expect("Failed to create AppState for test");
    (Arc::new(state), temp_dir)
}

/// Serve the full router on an ephemeral port
pub async fn spawn_server(state: Arc<AppState<FlatFileStorage>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = ws_router::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Next protocol message from the server, skipping control frames
pub async fn next_server_message(ws: &mut WsClient, what: &str) -> ServerToClient {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {what}"))
            .unwrap_or_else(|| panic!("Connection closed waiting for {what}"))
            .unwrap();

        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert nothing arrives for a short while
pub async fn assert_silent(ws: &mut WsClient) {
    let res = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "unexpected frame: {res:?}");
}

/// User ids of a roster update, in roster order
pub fn roster_users(msg: &ServerToClient) -> Vec<String> {
    match msg {
        ServerToClient::RosterUpdate { users } => {
            users.iter().map(|e| e.user_id.clone()).collect()
        },
        other => panic!("expected a roster update, got {other:?}"),
    }
}
