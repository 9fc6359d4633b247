use axum::{body::Body, extract::Path, Json};
use futures_util::stream;
use serde::Serialize;
use std::time::Duration;

use super::AppError;

/// Longest delay `/api/slow/:ms` will honour.
const MAX_SLOW_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
pub struct Echo {
    pub message: String,
    pub length: usize,
}

// ─── GET / ───────────────────────────────────────────────────────

pub async fn index() -> &'static str {
    "astromo-metrics demo host\n"
}

// ─── GET /api/echo/:msg ──────────────────────────────────────────

pub async fn echo(Path(msg): Path<String>) -> Json<Echo> {
    Json(Echo {
        length: msg.len(),
        message: msg,
    })
}

// ─── GET /api/slow/:ms ───────────────────────────────────────────
/// Sleeps before answering, to make the reported delay visible.

pub async fn slow(Path(ms): Path<u64>) -> Result<String, AppError> {
    if ms > MAX_SLOW_MS {
        return Err(AppError::BadRequest(format!(
            "delay {ms}ms exceeds the {MAX_SLOW_MS}ms limit"
        )));
    }
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(format!("slept {ms}ms\n"))
}

// ─── GET /api/stream ─────────────────────────────────────────────
/// Chunked body of unknown length: reported without `contentLength`.

pub async fn stream_chunks() -> Body {
    let chunks = (1..=5).map(|i| Ok::<_, std::io::Error>(format!("chunk {i}\n")));
    Body::from_stream(stream::iter(chunks))
}
