//! Build log WebSocket
//!
//! A client connecting to `/app/{slug}/build_logs/ws` joins the room of that
//! build. It first receives every line buffered so far as one `build`
//! message, then each new line as it is appended, and finally a `done`
//! message carrying the outcome.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use openapi_server::models::SocketMessage;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broadcast::{RoomEvent, Subscription};
use crate::models::build::LogLine;
use crate::server::state::ServerState;

/// How often to send WebSocket Ping frames
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

type Sender = SplitSink<WebSocket, Message>;

pub async fn build_logs_ws_handler(
    ws: WebSocketUpgrade,
    Path(slug): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, slug))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, room: String) {
    let (mut sender, receiver) = socket.split();

    match state.hub().join(&room) {
        Ok(subscription) => run_socket_loop(sender, receiver, subscription).await,
        Err(e) => {
            debug!("Rejecting log subscriber for {}: {}", room, e);
            let _ = send(&mut sender, &SocketMessage::error(&room, e.to_string())).await;
            let _ = send(&mut sender, &SocketMessage::done(&room, None)).await;
            let _ = sender.send(Message::Close(None)).await;
        }
    }
}

async fn send(sender: &mut Sender, message: &SocketMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|e| {
        warn!("Failed to serialize socket message: {}", e);
    })?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn texts(lines: Vec<LogLine>) -> Vec<String> {
    lines.into_iter().map(|line| line.text).collect()
}

/// Forward room events to the client with ping/pong keepalive. Ends after
/// the terminal message, on eviction, or when the client goes away.
async fn run_socket_loop(
    mut sender: Sender,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let room = subscription.key().to_string();

    // snapshot first, even when empty
    let snapshot = texts(subscription.take_snapshot());
    if send(&mut sender, &SocketMessage::build(&room, snapshot)).await.is_err() {
        return;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = subscription.recv() => {
                let message = match event {
                    Some(RoomEvent::Lines(lines)) => SocketMessage::build(&room, texts(lines)),
                    Some(RoomEvent::Error(text)) => SocketMessage::error(&room, text),
                    Some(RoomEvent::Finished(outcome)) => {
                        let outcome = serde_json::to_value(&outcome).ok();
                        let _ = send(&mut sender, &SocketMessage::done(&room, outcome)).await;
                        break;
                    }
                    None => {
                        // evicted for lagging
                        let _ = send(
                            &mut sender,
                            &SocketMessage::error(&room, "subscriber lagged behind, rejoin to replay the log"),
                        )
                        .await;
                        let _ = send(&mut sender, &SocketMessage::done(&room, None)).await;
                        break;
                    }
                };
                if send(&mut sender, &message).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    subscription.leave();
    let _ = sender.send(Message::Close(None)).await;
}
