use super::*;
use std::{collections::HashMap, time::Duration};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::domain::{ConversationId, MessageId, UserId};
use shared::protocol::MessagePayload;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

#[test]
fn rewrites_http_schemes_to_websocket() {
    let url = gateway_ws_url("https://chat.example.com", "tok").expect("url");
    assert!(url.starts_with("wss://chat.example.com/ws?"));

    let url = gateway_ws_url("http://127.0.0.1:8080", "tok").expect("url");
    assert!(url.starts_with("ws://127.0.0.1:8080/ws?"));
}

#[test]
fn keeps_explicit_websocket_schemes() {
    let url = gateway_ws_url("wss://gateway.example.com", "tok").expect("url");
    assert!(url.starts_with("wss://gateway.example.com/ws?"));
}

#[test]
fn escapes_the_token_query_value() {
    let url = gateway_ws_url("http://localhost:9000", "a b&c=d").expect("url");
    assert!(url.contains("token=a+b%26c%3Dd"));
}

#[test]
fn rejects_urls_without_a_scheme() {
    assert!(gateway_ws_url("chat.example.com", "tok").is_err());
}

#[derive(Clone)]
struct WsServerState {
    token_tx: std::sync::Arc<tokio::sync::Mutex<Option<oneshot::Sender<String>>>>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<WsServerState>,
) -> impl IntoResponse {
    let token = params.get("token").cloned().unwrap_or_default();
    if let Some(tx) = state.token_tx.lock().await.take() {
        let _ = tx.send(token);
    }
    ws.on_upgrade(echo_gateway)
}

/// Sends one event, then answers every typing command with a read receipt.
async fn echo_gateway(mut socket: WebSocket) {
    let greeting = GatewayEvent::NewMessage {
        message: MessagePayload {
            message_id: MessageId::new("m1"),
            conversation_id: ConversationId::new("conv-1"),
            sender_id: UserId::new("peer-1"),
            content: "hello".to_string(),
            created_at: chrono::Utc::now(),
            delivered: false,
        },
    };
    let frame = serde_json::to_string(&greeting).expect("serialize event");
    if socket.send(WsMessage::Text(frame)).await.is_err() {
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        if let WsMessage::Text(text) = frame {
            let command: ClientCommand = serde_json::from_str(&text).expect("parse command");
            if let ClientCommand::Typing {
                conversation_id, ..
            } = command
            {
                let reply = GatewayEvent::MessageRead {
                    conversation_id,
                    reader_id: UserId::new("peer-1"),
                };
                let frame = serde_json::to_string(&reply).expect("serialize event");
                if socket.send(WsMessage::Text(frame)).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn spawn_ws_server() -> (String, oneshot::Receiver<String>) {
    let (token_tx, token_rx) = oneshot::channel();
    let state = WsServerState {
        token_tx: std::sync::Arc::new(tokio::sync::Mutex::new(Some(token_tx))),
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (format!("http://{addr}"), token_rx)
}

#[tokio::test]
async fn websocket_session_delivers_gateway_events() {
    let (gateway_url, token_rx) = spawn_ws_server().await;

    let session = WebSocketGatewayConnector
        .connect(GatewayConnectOptions {
            gateway_url,
            token: "tok-ws".to_string(),
        })
        .await
        .expect("connect");
    let mut events = session.subscribe_events();

    let received_token = timeout(Duration::from_secs(2), token_rx)
        .await
        .expect("token wait")
        .expect("token");
    assert_eq!(received_token, "tok-ws");

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event wait")
        .expect("event");
    match event {
        GatewayEvent::NewMessage { message } => assert_eq!(message.message_id.0, "m1"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn websocket_session_round_trips_commands() {
    let (gateway_url, _token_rx) = spawn_ws_server().await;

    let session = WebSocketGatewayConnector
        .connect(GatewayConnectOptions {
            gateway_url,
            token: "tok-ws".to_string(),
        })
        .await
        .expect("connect");
    let mut events = session.subscribe_events();

    // drain the greeting event first
    let _ = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("greeting wait")
        .expect("greeting");

    session
        .send(ClientCommand::Typing {
            conversation_id: ConversationId::new("conv-9"),
            is_typing: true,
        })
        .await
        .expect("send");

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event wait")
        .expect("event");
    match event {
        GatewayEvent::MessageRead {
            conversation_id, ..
        } => assert_eq!(conversation_id.0, "conv-9"),
        other => panic!("unexpected event: {other:?}"),
    }

    session.close().await.expect("close");
}
