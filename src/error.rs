//! Error types for the metrics pipeline.
//!
//! None of these ever reach the host's request path: they are logged where
//! they occur and the affected record (or connection) is abandoned.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure to establish or keep the collector connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("websocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("failed to encode metrics record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("collector closed the connection")]
    Closed,
}

/// The response body failed, so no record is produced for it.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("response body failed: {0}")]
    Body(String),
}
