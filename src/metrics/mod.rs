pub mod report;
pub mod stats;

pub use report::DeliveryReport;
pub use stats::{DelaySummary, DeliveryStats, DropReason, StatsSnapshot};

use serde::Serialize;

use crate::clock::Delay;

/// One request's telemetry, exactly as it goes over the wire.
///
/// Built once per completed response and moved into `send`; nothing keeps
/// a copy after that.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub meta: Meta,
    pub req: RequestSample,
    pub res: ResponseSample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Fields captured from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSample {
    /// Moved into `meta.host` when the record is assembled.
    #[serde(skip)]
    pub host: Option<String>,
    pub delay: Delay,
    pub href: String,
    pub path: String,
}

/// Fields captured from the finished response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSample {
    pub status_code: u16,
    /// Absent (not zero) when the response advertised no length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub delay: Delay,
}

impl MetricsRecord {
    /// Merge the two halves of a request's samples.
    pub fn new(req: RequestSample, res: ResponseSample) -> Self {
        Self {
            meta: Meta {
                host: req.host.clone(),
            },
            req,
            res,
        }
    }
}
