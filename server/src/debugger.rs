//! The `/debugger` WebSocket: one connection carries named events with JSON
//! payloads in both directions.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::response::Response;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::AppState;
use crate::events::EventFrame;
use crate::events::OutgoingEvent;
use crate::message_processor::MessageProcessor;

/// Bound on the per-connection outgoing queue.
const CHANNEL_CAPACITY: usize = 128;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    debug!("client connected");
    let (mut sink, mut source) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OutgoingEvent>(CHANNEL_CAPACITY);

    // Writer task: the single funnel for this connection, so snapshots never
    // interleave on the wire.
    let writer = tokio::spawn(async move {
        while let Some(event) = outgoing_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("could not serialize outgoing event: {err}"),
            }
        }
    });

    let processor = MessageProcessor::new(state, outgoing_tx);
    while let Some(Ok(message)) = source.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<EventFrame>(text.as_str()) {
                Ok(frame) => {
                    // Each client event is served on its own task; ordering
                    // per session comes from the session mutex.
                    let processor = processor.clone();
                    tokio::spawn(async move {
                        processor.process(frame).await;
                    });
                }
                Err(err) => warn!("unparsable client frame: {err}"),
            },
            Message::Close(_) => break,
            _ => (),
        }
    }

    debug!("client disconnected");
    writer.abort();
}
