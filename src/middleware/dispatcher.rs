use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::completion::{Completion, ObservedBody};
use crate::clock::StartToken;
use crate::config::MetricsConfig;
use crate::metrics::{DeliveryStats, MetricsRecord, RequestSample};
use crate::sampler::{self, HostLabel, RequestInfo, ResponseInfo};
use crate::transport::{ConnectionState, RecordSink};

/// Per-process state of the metrics middleware.
///
/// Cheap to clone; every clone shares the sink, the host label and the
/// statistics.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    sink: Arc<dyn RecordSink>,
    host: HostLabel,
    stats: Arc<DeliveryStats>,
    debug: bool,
}

impl Dispatcher {
    pub fn new(
        config: &MetricsConfig,
        sink: Arc<dyn RecordSink>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self::with_host_label(config, sink, stats, HostLabel::new())
    }

    /// Use a host label decided up front instead of the first request's.
    pub fn with_host_label(
        config: &MetricsConfig,
        sink: Arc<dyn RecordSink>,
        stats: Arc<DeliveryStats>,
        host: HostLabel,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                host,
                stats,
                debug: config.debug,
            }),
        }
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.inner.stats
    }

    pub fn host(&self) -> Option<&str> {
        self.inner.host.get()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.sink.connection_state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.sink.is_authenticated()
    }

    /// Runs once the response body has finished, successfully or not.
    async fn on_completion(
        self,
        completion: Completion,
        request: RequestSample,
        response: ResponseInfo,
        start: StartToken,
    ) {
        if let Err(err) = completion.wait().await {
            error!(path = %request.path, error = %err, "discarding metrics record");
            self.inner.stats.record_observer_error();
            return;
        }

        let record = MetricsRecord::new(request, sampler::sample_response(&response, start));
        self.inner.stats.record_built(&record);

        if self.inner.debug {
            log_summary(&record);
        }

        self.inner.sink.send(record);
    }
}

fn log_summary(record: &MetricsRecord) {
    debug!(status_code = record.res.status_code, "response code");
    if let Some(content_length) = record.res.content_length {
        debug!(content_length, "payload size");
    }
    debug!(delay_ms = %record.res.delay.ms, "response delay");
    match serde_json::to_string(record) {
        Ok(json) => debug!(path = %record.req.path, record = %json, "will report"),
        Err(err) => debug!(path = %record.req.path, error = %err, "will report"),
    }
}

/// Axum middleware: times the request and reports it once the response
/// has been fully sent.
///
/// Mount with `axum::middleware::from_fn_with_state(dispatcher, track_metrics)`.
/// The handler chain is never held up: the record is assembled and sent
/// from a detached task.
pub async fn track_metrics(
    State(dispatcher): State<Dispatcher>,
    mut req: Request,
    next: Next,
) -> Response {
    // Reuse a token stamped by an outer timing layer
    let start = match req.extensions().get::<StartToken>() {
        Some(token) => *token,
        None => {
            let token = StartToken::now();
            req.extensions_mut().insert(token);
            token
        }
    };

    let info = RequestInfo::from_request(&req);
    // First arrival names the host, not first handler to finish
    dispatcher.inner.host.get_or_observe(info.host.as_deref());

    let response = next.run(req).await;

    let request = sampler::sample_request(&info, &dispatcher.inner.host, start);
    let response_info = ResponseInfo::from_response(&response);

    let (parts, body) = response.into_parts();
    let (body, completion) = ObservedBody::new(body);

    tokio::spawn(dispatcher.on_completion(completion, request, response_info, start));

    Response::from_parts(parts, Body::new(body))
}
