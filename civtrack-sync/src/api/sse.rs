//! Server-Sent Events stream of sync lifecycle events

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;

/// GET /sync/events
pub async fn sync_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to sync events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        debug!(run_id = %event.run_id(), "SSE: forwarding {}", event.event_type());
                        yield Ok(Event::default().event(event.event_type()).data(json));
                    }
                    Err(e) => warn!("SSE: failed to serialize {}: {}", event.event_type(), e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
