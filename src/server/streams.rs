// Telemetry streaming endpoints
//
// Logs go out as Server-Sent Events, frames as a multipart/x-mixed-replace
// JPEG stream. Both end when the client disconnects or the server shuts down.

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json, Response,
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

use super::handlers::AppError;
use super::DashboardServer;
use crate::telemetry::LogEvent;

const FRAME_BOUNDARY: &str = "frame";

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecentLogs {
    pub events: Vec<LogEvent>,
    /// Sequence the next live event will carry
    pub next_sequence: u64,
}

/// Handle GET /api/logs/recent - Context for a freshly opened viewer
pub async fn recent_logs(
    State(server): State<Arc<DashboardServer>>,
    Query(query): Query<RecentQuery>,
) -> Json<RecentLogs> {
    let logs = server.telemetry().logs();
    Json(RecentLogs {
        events: logs.recent(query.limit.unwrap_or(usize::MAX)),
        next_sequence: logs.next_sequence(),
    })
}

/// Handle GET /api/logs/stream - Live log lines as SSE
pub async fn stream_logs(
    State(server): State<Arc<DashboardServer>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = server.telemetry().subscribe_logs();
    tracing::debug!("Log stream subscriber connected");

    let events = subscription
        .into_stream()
        .map(|event| {
            Ok(Event::default()
                .id(event.sequence.to_string())
                .data(event.text))
        })
        .take_until(server.shutdown_signal());

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Handle GET /api/frames/stream - Latest rendered frame, replaced in place
pub async fn stream_frames(
    State(server): State<Arc<DashboardServer>>,
) -> Result<Response, AppError> {
    let subscription = server.telemetry().subscribe_frames();
    tracing::debug!("Frame stream subscriber connected");

    let parts = stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.next().await?;
        Some((Ok::<_, Infallible>(multipart_chunk(&frame.payload)), subscription))
    })
    .take_until(server.shutdown_signal());

    let response = Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(parts))
        .map_err(anyhow::Error::from)?;

    Ok(response)
}

fn multipart_chunk(payload: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        payload.len()
    );
    let mut chunk = Vec::with_capacity(head.len() + payload.len() + 2);
    chunk.extend_from_slice(head.as_bytes());
    chunk.extend_from_slice(payload);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}
