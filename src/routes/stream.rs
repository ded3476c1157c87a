//! `GET /api/aqi/stream`: live updates over Server-Sent Events.
//!
//! Each connection owns one [`Subscription`](crate::fanout::Subscription).
//! When the client goes away axum drops the response stream, which drops the
//! subscription and deregisters it.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::{routing::get, Router};
use futures::stream::{self, Stream, StreamExt};
use tracing::info;

use super::AppState;
use crate::fanout::FanoutEvent;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/aqi/stream", get(stream_updates))
}

async fn stream_updates(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // ---
    let subscription = state.fanout.subscribe();
    info!(
        subscriber = subscription.id(),
        total = state.fanout.subscriber_count(),
        "SSE client connected"
    );

    let connected = stream::once(async { FanoutEvent::Connected });
    let updates = stream::unfold(subscription, |mut sub| async move {
        sub.recv().await.map(|event| (event, sub))
    });

    let events = connected
        .chain(updates)
        .map(|event| Ok(Event::default().event(event.name()).data(event.data())));

    Sse::new(events)
}
