//! WebSocket subscription endpoint. Clients opt into one or more topics (global lifecycle
//! kinds or `transfer:<id>`) and receive a JSON frame per published event.

use crate::state::SharedState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use relayer_bus::{Event, EventBus, Subscription};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

const PING_INTERVAL: Duration = Duration::from_secs(30);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Inbound control messages a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Ping,
}

fn envelope(kind: &str, data: serde_json::Value) -> String {
    serde_json::json!({"type": kind, "data": data, "timestamp": chrono::Utc::now()}).to_string()
}

async fn upgrade(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sink, mut stream) = socket.split();
    let (forward_tx, mut forward_rx) = mpsc::channel::<Event>(256);
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);

    let _ = sink.send(Message::Text(envelope("connected", serde_json::json!({"clientId": client_id})).into())).await;

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            event = forward_rx.recv() => {
                let Some(event) = event else { break };
                if sink.send(Message::Text(serde_json::to_string(&event).unwrap_or_default().into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state.bus, &mut subscriptions, &forward_tx, &mut sink).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                for (topic, sub) in &subscriptions {
                    state.bus.touch(topic, *sub);
                }
            }
        }
    }

    for (topic, sub) in subscriptions {
        state.bus.unsubscribe(&topic, sub);
    }
}

async fn handle_client_message(
    text: &str,
    bus: &Arc<EventBus>,
    subscriptions: &mut HashMap<String, Subscription>,
    forward_tx: &mpsc::Sender<Event>,
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { topic }) => {
            if subscriptions.contains_key(&topic) {
                return;
            }
            let (sub, mut rx) = bus.subscribe(&topic);
            subscriptions.insert(topic.clone(), sub);
            let tx = forward_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            let _ = sink.send(Message::Text(envelope("subscribed", serde_json::json!({"topic": topic})).into())).await;
        }
        Ok(ClientMessage::Unsubscribe { topic }) => {
            if let Some(sub) = subscriptions.remove(&topic) {
                bus.unsubscribe(&topic, sub);
            }
            let _ = sink.send(Message::Text(envelope("unsubscribed", serde_json::json!({"topic": topic})).into())).await;
        }
        Ok(ClientMessage::Ping) => {
            let _ = sink.send(Message::Text(envelope("pong", serde_json::json!({})).into())).await;
        }
        Err(_) => {
            let _ = sink
                .send(Message::Text(envelope("error", serde_json::json!({"error": "unrecognized message"})).into()))
                .await;
        }
    }
}

/// Builds the `/ws` router.
pub fn router(state: SharedState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}
