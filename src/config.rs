use serde::Deserialize;

/// Collector endpoint used when none is configured.
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:8081";

/// Records buffered between `send` and the socket writer before new
/// records start being dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Options supplied once when the collector is created.
///
/// Deserializes from a partial option object such as
/// `{"gatewayUrl": "ws://collector:8081"}`; any key left out keeps its
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsConfig {
    /// WebSocket endpoint of the telemetry collector.
    pub gateway_url: String,
    /// Enables debug-level lifecycle logs and per-record summaries.
    pub debug: bool,
    /// Capacity of the outbound record queue.
    pub queue_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_owned(),
            debug: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MetricsConfig {
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        // mpsc::channel panics on zero
        self.queue_capacity = capacity.max(1);
        self
    }
}
