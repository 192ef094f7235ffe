//! Server-Sent Events support

use crate::runtime::{ExecutionEvent, TurnStream};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::time::Duration;
use tokio_stream::StreamExt;

/// One `data:` record per event. Dropping the response cancels the turn.
pub fn sse_stream(turn: TurnStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(turn.map(to_sse_event)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_sse_event(event: ExecutionEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event)
}
