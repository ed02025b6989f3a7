//! Live event streaming over Server-Sent Events.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Concurrent stream connections are bounded; beyond this the endpoint
/// answers 429.
const MAX_SUBSCRIBERS: usize = 10;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Decrements the subscriber count when a connection ends.
struct SubscriberGuard(Arc<AtomicUsize>);

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        debug!("event stream subscriber disconnected");
    }
}

/// `GET /api/logs/stream` — the event bus as `text/event-stream`.
///
/// The broadcast ring gives each subscriber a bounded queue: a slow
/// consumer loses the oldest events instead of stalling the runner.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscribers = Arc::clone(&state.stream_subscribers);
    let previous = subscribers.fetch_add(1, Ordering::SeqCst);
    if previous >= MAX_SUBSCRIBERS {
        subscribers.fetch_sub(1, Ordering::SeqCst);
        return Err(ApiError::new(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            "Too many stream connections",
        ));
    }
    let guard = SubscriberGuard(subscribers);

    let receiver = state.bus.subscribe();
    let connected = futures::stream::once(async {
        Ok::<_, Infallible>(Event::default().data(r#"{"type":"connected"}"#))
    });
    let events = BroadcastStream::new(receiver).filter_map(move |item| {
        // The guard lives as long as the stream does.
        let _keep = &guard;
        futures::future::ready(match item {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(_) => None,
            },
            // Dropped events surface as a lag marker rather than silence.
            Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Ok(Event::default()
                .data(format!(r#"{{"type":"lagged","missed":{missed}}}"#)))),
        })
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
