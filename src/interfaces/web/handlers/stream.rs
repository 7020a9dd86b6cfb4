use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use super::super::AppState;

/// Long-lived dashboard stream: a synthetic `connected` event, then every
/// bus event as a named SSE record. A consumer that lagged past its queue
/// bound gets a `resync` event carrying the number of dropped events so it
/// can re-fetch baseline state. Keep-alive comments flow every 15 s; a write
/// error simply ends the stream, the server never retries.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.bus.subscribe();

    let connected = tokio_stream::once(Ok(Event::default().event("connected").data("{}")));
    let events = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Ok(Event::default().event(event.kind.as_str()).data(data))
        }
        Err(BroadcastStreamRecvError::Lagged(dropped)) => Ok(Event::default()
            .event("resync")
            .data(json!({ "dropped": dropped }).to_string())),
    });

    Sse::new(connected.chain(events))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Follow the daemon's own log lines, for the dashboard's console view.
pub async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(BroadcastStreamRecvError::Lagged(_)) => Ok(Event::default().data("log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
