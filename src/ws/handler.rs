use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Extension, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use super::connection::{serve_socket, Connection};
use crate::auth::auth;
use crate::db::StoreError;
use crate::models::{error_response, ErrorResponse};
use crate::state::{AppState, AuthUser};

/// Handshake for a note's realtime session.
///
/// Everything that can reject the request runs before the upgrade, so a
/// rejected caller never reaches the hub.
pub async fn note_ws(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(raw_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    info!("New WebSocket connection attempt on note '{}' by user {}", raw_id, user.user_id);

    // Parse note id
    let note_id = match raw_id.parse::<i64>() {
        Ok(id) if id > 0 => id,
        _ => return Err(error_response(StatusCode::BAD_REQUEST, "invalid note id")),
    };

    // Load the note
    let note = match state.notes.get_note_by_id(note_id).await {
        Ok(note) => note,
        Err(StoreError::NotFound) => {
            return Err(error_response(StatusCode::NOT_FOUND, "note not found"));
        }
        Err(e) => {
            error!("Failed to load note {}: {}", note_id, e);
            return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    // Owner or collaborator only
    auth::ensure_note_access(&note, user.user_id, state.collaborators.as_ref()).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let response = ws
        .max_message_size(state.ws_max_message_bytes)
        .on_upgrade(move |socket| {
            let (conn, member, outbound) = Connection::new(
                user.user_id,
                note_id,
                state.hub.clone(),
                state.notes.clone(),
                state.ws_send_buffer,
            );
            serve_socket(socket, conn, member, outbound)
        });
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::memory::MemoryStore;
    use crate::models::Payload;
    use crate::routes::create_app;
    use crate::services::auth_service::sign_token;
    use crate::ws::hub::{Hub, HubHandle, HubStats};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    const SECRET: &str = "handshake-secret";
    const OWNER: i64 = 1;
    const COLLABORATOR: i64 = 2;
    const COLLABORATOR_2: i64 = 4;
    const STRANGER: i64 = 3;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn fixtures() -> (Arc<MemoryStore>, HubHandle, axum::Router) {
        fixtures_with_buffer(Config::default().ws_send_buffer)
    }

    fn fixtures_with_buffer(ws_send_buffer: usize) -> (Arc<MemoryStore>, HubHandle, axum::Router) {
        let store = Arc::new(MemoryStore::new());
        store.insert_note(5, OWNER, "");
        store.add_collaborator(5, COLLABORATOR);
        store.add_collaborator(5, COLLABORATOR_2);

        let (hub, _worker) = Hub::start();
        let config = Config {
            jwt_secret: Some(SECRET.to_string()),
            ws_send_buffer,
            ..Config::default()
        };
        let state = AppState::new(&config, hub.clone(), store.clone(), store.clone());
        (store, hub, create_app(state, &config))
    }

    async fn serve(app: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn bearer(user_id: i64) -> String {
        format!("Bearer {}", sign_token(&user_id.to_string(), "access", 3600, SECRET))
    }

    async fn connect(
        addr: SocketAddr,
        note: &str,
        user_id: i64,
    ) -> Result<Client, tungstenite::Error> {
        let mut req = format!("ws://{}/api/v1/ws/notes/{}", addr, note)
            .into_client_request()
            .unwrap();
        req.headers_mut().insert("authorization", bearer(user_id).parse().unwrap());
        connect_async(req).await.map(|(client, _)| client)
    }

    async fn recv(client: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("read failed");
            if let WsMessage::Text(_) = msg {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    async fn send(client: &mut Client, frame: &str) {
        client.send(WsMessage::text(frame)).await.unwrap();
    }

    fn presence(n: usize) -> Value {
        json!({"type": "presence", "noteId": 5, "activeUser": n})
    }

    fn rejected_status(result: Result<Client, tungstenite::Error>) -> u16 {
        match result {
            Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("handshake unexpectedly succeeded"),
        }
    }

    async fn get_json(app: axum::Router, uri: &str, auth: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn owner_and_collaborator_share_patches() {
        let (store, _hub, app) = fixtures();
        let addr = serve(app).await;

        let mut a = connect(addr, "5", OWNER).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(1));
        let mut b = connect(addr, "5", COLLABORATOR).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(2));
        assert_eq!(recv(&mut b).await, presence(2));

        send(&mut a, r#"{"type":"patch","patch":"hello","version":1}"#).await;

        let expected =
            json!({"type": "patch", "noteId": 5, "patch": "hello", "userId": OWNER, "version": 1});
        assert_eq!(recv(&mut a).await, expected);
        assert_eq!(recv(&mut b).await, expected);
        assert_eq!(store.content(5).as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn mismatched_note_id_only_errors_the_sender() {
        let (store, _hub, app) = fixtures();
        let addr = serve(app).await;

        let mut a = connect(addr, "5", OWNER).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(1));
        let mut b = connect(addr, "5", COLLABORATOR).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(2));
        assert_eq!(recv(&mut b).await, presence(2));

        send(&mut b, r#"{"type":"patch","noteId":7,"patch":"x","version":1}"#).await;
        assert_eq!(
            recv(&mut b).await,
            json!({"type": "error", "noteId": 5, "error": "note id mismatch"})
        );
        assert_eq!(store.update_count(), 0);

        // the next frame A sees is the follow-up patch, nothing was relayed before it
        send(&mut b, r#"{"type":"patch","noteId":5,"patch":"y","version":2}"#).await;
        assert_eq!(
            recv(&mut a).await,
            json!({
                "type": "patch", "noteId": 5, "patch": "y", "userId": COLLABORATOR, "version": 2
            })
        );
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn third_member_raises_presence_for_everyone() {
        let (_store, hub, app) = fixtures();
        let addr = serve(app).await;

        let mut a = connect(addr, "5", OWNER).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(1));
        let mut b = connect(addr, "5", COLLABORATOR).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(2));
        assert_eq!(recv(&mut b).await, presence(2));

        let mut c = connect(addr, "5", COLLABORATOR_2).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(3));
        assert_eq!(recv(&mut b).await, presence(3));
        assert_eq!(recv(&mut c).await, presence(3));
        assert_eq!(hub.presence(5).await, 3);

        // leaving lowers it again
        c.close(None).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(2));
        assert_eq!(recv(&mut b).await, presence(2));
    }

    #[tokio::test]
    async fn stranger_is_forbidden_and_never_joins() {
        let (_store, hub, app) = fixtures();
        let addr = serve(app).await;

        assert_eq!(rejected_status(connect(addr, "5", STRANGER).await), 403);
        assert_eq!(hub.presence(5).await, 0);
        assert_eq!(hub.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn handshake_rejections() {
        let (_store, hub, app) = fixtures();
        let addr = serve(app).await;

        assert_eq!(rejected_status(connect(addr, "abc", OWNER).await), 400);
        assert_eq!(rejected_status(connect(addr, "0", OWNER).await), 400);
        assert_eq!(rejected_status(connect(addr, "99", OWNER).await), 404);

        let req = format!("ws://{}/api/v1/ws/notes/5", addr).into_client_request().unwrap();
        assert_eq!(rejected_status(connect_async(req).await.map(|(c, _)| c)), 401);

        assert_eq!(hub.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn rejection_bodies_carry_the_error_message() {
        let (_store, _hub, app) = fixtures();

        let (status, body) = get_json(app.clone(), "/api/v1/ws/notes/5", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "missing or invalid authorization header"}));

        let (status, body) =
            get_json(app.clone(), "/api/v1/ws/notes/5", Some("Bearer nope".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "invalid or expired token"}));

        let (status, body) = get_json(app.clone(), "/api/v1/ws/notes/x", Some(bearer(OWNER))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid note id"}));

        let (status, body) =
            get_json(app.clone(), "/api/v1/ws/notes/99", Some(bearer(OWNER))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "note not found"}));

        let (status, body) = get_json(app, "/api/v1/ws/notes/5", Some(bearer(STRANGER))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"error": "no access to this note"}));
    }

    #[tokio::test]
    async fn health_endpoints_answer() {
        let (_store, _hub, app) = fixtures();

        let (status, body) = get_json(app.clone(), "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(app, "/api/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rooms"], 0);
    }

    async fn wait_for_close(client: &mut Client) {
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(msg)) = client.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket was not closed");
    }

    #[tokio::test]
    async fn slow_client_is_evicted_and_disconnected() {
        let (store, hub, app) = fixtures_with_buffer(1);
        let addr = serve(app).await;

        // never reads until it is cut off
        let mut slow = connect(addr, "5", COLLABORATOR).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.presence(5).await != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        for i in 0..64 {
            hub.broadcast(5, Payload::from(format!(r#"{{"type":"patch","patch":"p{}"}}"#, i)));
        }
        assert_eq!(hub.presence(5).await, 0);

        // an edit sent after eviction is never saved
        let _ = slow
            .send(WsMessage::text(r#"{"type":"patch","patch":"late","version":1}"#))
            .await;
        wait_for_close(&mut slow).await;
        assert_eq!(store.update_count(), 0);
        assert_eq!(hub.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn hub_shutdown_closes_open_sockets() {
        let (_store, hub, app) = fixtures();
        let addr = serve(app).await;

        let mut a = connect(addr, "5", OWNER).await.unwrap();
        assert_eq!(recv(&mut a).await, presence(1));

        hub.shutdown().await;
        wait_for_close(&mut a).await;
    }
}
