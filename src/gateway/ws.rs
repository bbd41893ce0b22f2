//! WebSocket transport for the gateway
//!
//! Clients connect with `GET /ws?userId=<id>` and exchange one JSON event per
//! text frame. Each connection runs a writer task draining the session's
//! outbound channel and a reader task feeding inbound events to the handler;
//! when either finishes the other is aborted and the session is disconnected.

use crate::gateway::session::{Session, SessionHandler};
use crate::types::{ClientEvent, ServerEvent};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

/// Frames larger than this many times the message limit close the socket
/// instead of being dropped one by one.
const HARD_FRAME_LIMIT_FACTOR: usize = 4;

#[derive(Clone)]
struct WsState {
    handler: Arc<dyn SessionHandler>,
    max_message_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Router serving the gateway WebSocket endpoint
pub fn router(handler: Arc<dyn SessionHandler>, max_message_bytes: usize) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(WsState {
        handler,
        max_message_bytes,
    })
}

async fn ws_handler(
    State(state): State<WsState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match params.user_id {
        Some(user_id) if !user_id.trim().is_empty() => user_id,
        _ => return (StatusCode::BAD_REQUEST, "missing userId").into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hard_limit = state
        .max_message_bytes
        .saturating_mul(HARD_FRAME_LIMIT_FACTOR);
    ws.max_message_size(hard_limit)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: WsState, user_id: String) {
    let (session, outbound) = match state.handler.on_connect(&user_id).await {
        Ok(registered) => registered,
        Err(e) => {
            error!("Failed to register connection for {}: {:#}", user_id, e);
            return;
        }
    };

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(write_events(ws_sender, outbound));

    let handler = state.handler.clone();
    let reader_session = session.clone();
    let max_message_bytes = state.max_message_bytes;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            let parsed = match message {
                Message::Text(text) => {
                    parse_frame(&reader_session, text.as_str().as_bytes(), max_message_bytes)
                }
                Message::Binary(bytes) => parse_frame(&reader_session, &bytes, max_message_bytes),
                Message::Close(_) => break,
                _ => None,
            };

            if let Some(event) = parsed {
                handler.on_event(&reader_session, event).await;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.handler.on_disconnect(&session).await;
}

/// Forward outbound events until the session's channel closes, then close the socket
async fn write_events<S>(mut ws_sender: S, mut outbound: UnboundedReceiver<ServerEvent>)
where
    S: futures_util::Sink<Message> + Unpin,
{
    while let Some(event) = outbound.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound event: {}", e);
                continue;
            }
        };
        if ws_sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}

/// Decode one inbound frame. Oversized or malformed frames are dropped.
fn parse_frame(session: &Session, data: &[u8], max_message_bytes: usize) -> Option<ClientEvent> {
    if data.len() > max_message_bytes {
        warn!(
            "Dropped {} byte frame from {} (limit {})",
            data.len(),
            session.user_id,
            max_message_bytes
        );
        return None;
    }

    match serde_json::from_slice(data) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropped malformed frame from {}: {}", session.user_id, e);
            debug!("Frame: {}", String::from_utf8_lossy(data));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ConnectionRegistry, Gateway, GatewayConfig};
    use crate::matching::InMemoryQueueStore;
    use crate::metrics::MetricsCollector;
    use crate::rooms::RoomRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let connections = Arc::new(ConnectionRegistry::new());
        let gateway = Gateway::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(RoomRegistry::new(connections.clone(), metrics.clone())),
            connections,
            GatewayConfig::default(),
            metrics,
        );
        router(Arc::new(gateway), 1024)
    }

    fn test_session() -> Session {
        Session {
            user_id: "alice".to_string(),
            connection_id: uuid::Uuid::new_v4(),
            connected_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_user_id_is_rejected() {
        let response = test_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/ws?userId=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_plain_http_request_is_not_upgraded() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/ws?userId=alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_parse_frame() {
        let session = test_session();

        assert_eq!(
            parse_frame(&session, br#"{"type":"ping"}"#, 1024),
            Some(ClientEvent::Ping)
        );
        assert_eq!(parse_frame(&session, b"not json", 1024), None);
        assert_eq!(parse_frame(&session, br#"{"type":"dance"}"#, 1024), None);

        let oversized = format!(r#"{{"type":"ping","pad":"{}"}}"#, "x".repeat(2048));
        assert_eq!(parse_frame(&session, oversized.as_bytes(), 1024), None);
    }
}
