//! GET /ws: live alert feed.
//!
//! Each client gets a welcome message, then every alert the hub broadcasts.
//! Inbound messages are ignored; they only keep the connection alive.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::hub::AlertHub;
use crate::state::AppState;

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

async fn client_session(socket: WebSocket, hub: Arc<AlertHub>) {
    let mut alerts = BroadcastStream::new(hub.subscribe());
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(clients = hub.subscriber_count(), "websocket client connected");

    let welcome = json!({ "message": "Connected to herd behavior alerts" }).to_string();
    if sender.send(Message::Text(welcome)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            alert = alerts.next() => match alert {
                Some(Ok(payload)) => {
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "websocket client lagging, skipped alerts");
                }
                None => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("websocket client disconnected");
}
