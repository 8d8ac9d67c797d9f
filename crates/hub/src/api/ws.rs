//! WebSocket endpoint: one socket, one channel.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use shared::{channels, ClientMessage};

use crate::api::AppState;
use crate::broadcast::Frame;

/// Transport-level ping so proxies keep idle sockets open.
const TRANSPORT_PING_SECS: u64 = 30;

pub async fn channel_ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !channels::is_known(&channel) {
        return (StatusCode::NOT_FOUND, format!("unknown channel: {}", channel)).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, channel, state))
}

/// Spectator feed at its REST-adjacent path.
pub async fn live_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, channels::LIVE.to_string(), state))
}

async fn handle_socket(socket: WebSocket, channel: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(state.config.connection_queue_capacity);

    let id = match state.live.connect(&channel, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "rejecting socket");
            return;
        }
    };

    let mut ping_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(TRANSPORT_PING_SECS));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Ends when the hub drops this connection (queue closed) or the peer goes away.
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match ClientMessage::decode(text.as_str()) {
                    Ok(message) => {
                        if state.live.inbound(id, message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = id, channel = %channel, error = %e, "discarding client frame");
                    }
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {
                    let _ = state.live.heartbeat(id).await;
                }
            },
        }
    }

    writer.abort();
    let _ = state.live.disconnect(id).await;
}

#[cfg(test)]
mod tests {
    use crate::api::{router, test_state};
    use futures_util::{SinkExt, StreamExt};
    use shared::{ClientMessage, Envelope};
    use std::net::SocketAddr;
    use tokio_tungstenite::tungstenite::Message;

    async fn serve() -> SocketAddr {
        let app = router(test_state());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    type Socket = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn next_envelope(ws: &mut Socket) -> Envelope {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return Envelope::decode(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn next_of(ws: &mut Socket, message_type: &str) -> Envelope {
        loop {
            let env = next_envelope(ws).await;
            if env.r#type == message_type {
                return env;
            }
        }
    }

    #[tokio::test]
    async fn ping_is_answered_after_malformed_frame() {
        let addr = serve().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/chat", addr))
            .await
            .unwrap();

        ws.send(Message::Text("{not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"confetti"}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(ClientMessage::Ping.encode().unwrap()))
            .await
            .unwrap();

        let pong = next_of(&mut ws, "pong").await;
        assert!(pong.emitted_at.is_some());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let addr = serve().await;
        let err = tokio_tungstenite::connect_async(format!("ws://{}/ws/admin", addr))
            .await
            .unwrap_err();
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), 404)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn live_alias_sends_presence_then_status() {
        let addr = serve().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/api/live/ws", addr))
            .await
            .unwrap();
        let first = next_envelope(&mut ws).await;
        assert_eq!(first.r#type, "presence_update");
        assert_eq!(first.payload["count"], 1);
        assert_eq!(next_envelope(&mut ws).await.r#type, "status_update");
    }

    #[tokio::test]
    async fn closing_a_socket_updates_presence() {
        let addr = serve().await;
        let url = format!("ws://{}/ws/cards", addr);
        let (mut stays, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_of(&mut stays, "presence_update").await.payload["count"], 1);
        let (mut leaves, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        assert_eq!(next_of(&mut stays, "presence_update").await.payload["count"], 2);

        leaves.close(None).await.unwrap();
        assert_eq!(next_of(&mut stays, "presence_update").await.payload["count"], 1);
    }
}
