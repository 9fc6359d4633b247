//! astromo-metrics: request-timing middleware for axum.
//!
//! Every request that passes through [`track_metrics`] is timed from
//! arrival until its response body has been fully sent. The resulting
//! [`MetricsRecord`] is streamed as JSON over a single WebSocket to a
//! telemetry collector.
//!
//! ```text
//! request ─► track_metrics ─► handler chain ─► response body flushed
//!                 │                                   │ (one-shot signal)
//!                 └── StartToken ─────────────► sampler ─► MetricsRecord
//!                                                         │
//!                                              Transport::send ─► collector
//! ```
//!
//! Delivery is best effort: one connection attempt, no reconnect, no
//! retry. Telemetry failures are logged and never reach the request path.
//!
//! ```no_run
//! use astromo_metrics::{create_metrics_middleware, track_metrics, MetricsConfig};
//! use axum::{middleware, routing::get, Router};
//!
//! # async fn run() {
//! let metrics = create_metrics_middleware(
//!     MetricsConfig::default().with_gateway_url("ws://collector:8081"),
//! );
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(metrics, track_metrics));
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod sampler;
pub mod server;
pub mod transport;

use std::sync::Arc;

pub use clock::{Delay, StartToken};
pub use config::MetricsConfig;
pub use metrics::{DeliveryReport, DeliveryStats, MetricsRecord, StatsSnapshot};
pub use middleware::{track_metrics, Dispatcher};
pub use transport::{ConnectionState, RecordSink, Transport};

/// Build the middleware state and start the collector connection.
///
/// Must be called from within a tokio runtime. The connection attempt
/// runs in the background; its outcome never affects the caller.
pub fn create_metrics_middleware(config: MetricsConfig) -> Dispatcher {
    let stats = Arc::new(DeliveryStats::new());
    let transport = Transport::new(&config, stats.clone());
    transport.connect();
    Dispatcher::new(&config, Arc::new(transport), stats)
}
