//! SSE forwarding of the orchestrator's event bus (spec.md §4.5/§4.10):
//! subscribers receive the event stream verbatim for UI streaming.
//!
//! Grounded on krusty-server's `routes/chat.rs` SSE pattern: an
//! `mpsc::Receiver` fed by a background task, wrapped in a
//! `ReceiverStream` and handed to `Sse::new`, rather than adapting the
//! broadcast receiver into a stream directly (keeps this route's only
//! dependency on the event bus a plain `subscribe` + `recv` loop, matching
//! how every other consumer in this crate observes it).

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::AppState;

const SSE_CHANNEL_BUFFER: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stream_events))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.event_bus.subscribe();
    let (tx, out_rx) = mpsc::channel(SSE_CHANNEL_BUFFER);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    if tx.send(Ok(SseEvent::default().data(payload))).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Sse::new(ReceiverStream::new(out_rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
