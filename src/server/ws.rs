//! Live viewer sessions over WebSocket.
//!
//! A viewer is registered with the fan-out before its greeting is built, so
//! nothing published in between is lost. Each session ends when the client
//! goes away, the socket errors, or shutdown is requested. Sends are raced
//! against shutdown, so a viewer that stops reading cannot hold a session
//! open past it.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::api::DEFAULT_READINGS_COUNT;
use super::AppState;
use crate::fanout::PushEvent;
use crate::store::StateStore;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Message sent by a viewer.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// `GET /ws`: upgrade to a viewer session tracked by the server.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        let sessions = state.sessions.clone();
        sessions.track_future(session(socket, state))
    })
}

/// Events sent to a viewer right after it connects.
pub fn greeting(store: &StateStore) -> Vec<PushEvent> {
    let mut events = vec![PushEvent::SystemStatus(store.snapshot_status())];
    if let Some(current) = store.current() {
        events.push(PushEvent::NewReading(current));
    }
    let recent = store.recent(DEFAULT_READINGS_COUNT);
    if !recent.is_empty() {
        events.push(PushEvent::RecentReadings(recent));
    }
    events
}

/// Reply to a viewer message, `None` for anything unrecognised.
pub fn reply(store: &StateStore, text: &str) -> Option<PushEvent> {
    let message: ClientMessage = serde_json::from_str(text).ok()?;
    match message.event.as_str() {
        "request_status" => Some(PushEvent::StatusUpdate(store.snapshot_status())),
        "request_readings" => {
            let count = message
                .data
                .get("count")
                .and_then(serde_json::Value::as_u64)
                .map_or(DEFAULT_READINGS_COUNT, |c| c as usize);
            Some(PushEvent::ReadingsUpdate(store.recent(count)))
        }
        other => {
            trace!("Ignoring viewer message '{}'", other);
            None
        }
    }
}

/// Send one event, `false` if the session should end.
async fn send<S>(sink: &mut S, event: &PushEvent, cancel: &CancellationToken) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    match event.to_json() {
        Ok(json) => tokio::select! {
            _ = cancel.cancelled() => false,
            sent = sink.send(Message::Text(json.into())) => sent.is_ok(),
        },
        Err(e) => {
            debug!("Dropping unencodable {} event: {}", event.name(), e);
            true
        }
    }
}

async fn session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut viewer = state.fanout.subscribe();
    debug!("Viewer connected ({} total)", state.fanout.viewer_count());

    for event in greeting(&state.store) {
        if !send(&mut sink, &event, &state.cancel).await {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                break;
            }
            event = viewer.next() => match event {
                Some(event) => {
                    if !send(&mut sink, &event, &state.cancel).await {
                        break;
                    }
                }
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = reply(&state.store, text.as_str()) {
                        if !send(&mut sink, &event, &state.cancel).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Viewer disconnected, skipped {} events", viewer.skipped());
}
