//! Log tail and live log streaming
//!
//! One route serves both stream transports: a WebSocket upgrade gets one
//! frame per log chunk, anything else gets a line-oriented SSE push. Both
//! relay the same follow stream and close it on subscriber disconnect,
//! container exit, or runtime error.

use std::convert::Infallible;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::{future::Either, stream, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::docker::{self, DockerError};
use crate::identity::container_name;

use super::super::AppState;
use super::ApiError;

/// Lines of history replayed when a follow stream opens.
const STREAM_TAIL_LINES: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    /// Parsed leniently: anything unusable falls back to the default.
    pub lines: Option<String>,
}

/// Bounded log tail for one instance.
pub async fn tail_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TailQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.orchestrator.has_instance(&id) {
        return Err(ApiError::not_found("No such instance"));
    }

    let requested = query
        .lines
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(50);
    let lines = docker::logs::clamp_lines(requested);

    match docker::logs::tail(&container_name(&id), lines).await {
        Ok(logs) => Ok(Json(json!({ "logs": logs }))),
        Err(DockerError::NotFound) => Err(ApiError::not_found("Container not found")),
        Err(err) => Err(ApiError::unavailable(err.to_string())),
    }
}

/// Live log stream for one instance, WebSocket or SSE.
pub async fn stream_logs(
    State(_state): State<AppState>,
    Path(id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let name = container_name(&id);

    match ws {
        Some(upgrade) => upgrade.on_upgrade(move |socket| relay_websocket(socket, name)),
        None => sse_response(name),
    }
}

/// Relay log chunks over a WebSocket, one frame per chunk.
async fn relay_websocket(socket: WebSocket, name: String) {
    let (mut sender, mut receiver) = socket.split();

    let stream = match docker::logs::follow(&name, STREAM_TAIL_LINES) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = sender.send(Message::Text(error_token(&err))).await;
            let _ = sender.close().await;
            return;
        }
    };
    tokio::pin!(stream);

    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let _ = sender.send(Message::Text(error_token(&err))).await;
                    break;
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    // Dropping the pinned stream closes the daemon connection.
    debug!("log stream for {} closed", name);
    let _ = sender.close().await;
}

/// SSE fallback: each log line becomes one `data:` record, with headers
/// that defeat caching and intermediary buffering.
fn sse_response(name: String) -> Response {
    let events = match docker::logs::follow(&name, STREAM_TAIL_LINES) {
        Ok(stream) => Either::Left(stream.flat_map(|chunk| {
            let events: Vec<Result<Event, Infallible>> = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|line| Ok(Event::default().data(line.to_string())))
                    .collect(),
                Err(err) => vec![Ok(Event::default().data(error_token(&err)))],
            };
            stream::iter(events)
        })),
        Err(err) => {
            let failure: Vec<Result<Event, Infallible>> =
                vec![Ok(Event::default().data(error_token(&err)))];
            Either::Right(stream::iter(failure))
        }
    };

    (
        stream_headers(),
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    headers
}

fn error_token(err: &DockerError) -> String {
    format!("error: {}", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_token_single_line() {
        let token = error_token(&DockerError::NotFound);
        assert_eq!(token, "error: container not found");
        assert!(!token.contains('\n'));
    }
}
