//! Extraction of the fixed set of request/response fields that make up a
//! [`MetricsRecord`](crate::metrics::MetricsRecord).
//!
//! The request is moved into the handler chain before anything is sampled,
//! so the dispatcher first snapshots it into a [`RequestInfo`]. The
//! response is read in place right after the chain returns its head.

use std::sync::OnceLock;

use axum::http::{header, Request, Response, StatusCode};
use http_body::Body;

use crate::clock::StartToken;
use crate::metrics::{RequestSample, ResponseSample};

/// The server's advertised hostname, shared by every record.
///
/// Set from the first request that carries a host and never changed
/// afterwards.
#[derive(Debug, Default)]
pub struct HostLabel(OnceLock<String>);

impl HostLabel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded label, for hosts that know their name at startup.
    pub fn fixed(host: impl Into<String>) -> Self {
        let label = Self::new();
        let _ = label.0.set(host.into());
        label
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    /// Returns the cached label, initialising it from `observed` if unset.
    pub fn get_or_observe(&self, observed: Option<&str>) -> Option<&str> {
        if let Some(host) = self.get() {
            return Some(host);
        }
        let host = observed?;
        Some(self.0.get_or_init(|| host.to_owned()).as_str())
    }
}

/// What the sampler needs from a request, detached from its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub host: Option<String>,
    pub scheme: String,
    pub path: String,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = req
            .uri()
            .host()
            .map(str::to_owned)
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(|authority| strip_port(authority).to_owned())
            })
            .filter(|h| !h.is_empty());

        Self {
            host,
            scheme: req.uri().scheme_str().unwrap_or("http").to_owned(),
            path: req.uri().path().to_owned(),
        }
    }
}

/// What the sampler needs from a response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    pub content_length: Option<u64>,
}

impl ResponseInfo {
    pub fn from_response<B: Body>(res: &Response<B>) -> Self {
        let status = res.status();

        let declared = res
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        // Without the header, report what hyper will advertise for a
        // body of known size.
        let content_length = declared.or_else(|| {
            if can_have_body(status) {
                res.body().size_hint().exact()
            } else {
                None
            }
        });

        Self {
            status: status.as_u16(),
            content_length,
        }
    }
}

pub fn sample_request(
    info: &RequestInfo,
    host_label: &HostLabel,
    start: StartToken,
) -> RequestSample {
    let host = host_label.get_or_observe(info.host.as_deref());
    let href = format!("{}://{}{}", info.scheme, host.unwrap_or(""), info.path);

    RequestSample {
        host: host.map(str::to_owned),
        delay: start.elapsed(),
        href,
        path: info.path.clone(),
    }
}

/// Delay is measured from the same token as the request sample.
pub fn sample_response(info: &ResponseInfo, start: StartToken) -> ResponseSample {
    ResponseSample {
        status_code: info.status,
        content_length: info.content_length,
        delay: start.elapsed(),
    }
}

fn can_have_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// `example.com:8080` → `example.com`, `[::1]:3000` → `[::1]`.
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use futures_util::stream;

    fn get(uri: &str, host: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn request_info_from_host_header() {
        let info = RequestInfo::from_request(&get("/foo?x=1", Some("example.com:8080")));
        assert_eq!(info.host.as_deref(), Some("example.com"));
        assert_eq!(info.scheme, "http");
        assert_eq!(info.path, "/foo");
    }

    #[test]
    fn request_info_prefers_absolute_uri() {
        let info = RequestInfo::from_request(&get(
            "https://api.example.com/v1/items",
            Some("other.example.com"),
        ));
        assert_eq!(info.host.as_deref(), Some("api.example.com"));
        assert_eq!(info.scheme, "https");
        assert_eq!(info.path, "/v1/items");
    }

    #[test]
    fn request_info_without_host() {
        let info = RequestInfo::from_request(&get("/foo", None));
        assert_eq!(info.host, None);
    }

    #[test]
    fn strips_ports() {
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
    }

    #[test]
    fn host_label_first_writer_wins() {
        let label = HostLabel::new();
        assert_eq!(label.get_or_observe(None), None);
        assert_eq!(label.get_or_observe(Some("a.example")), Some("a.example"));
        assert_eq!(label.get_or_observe(Some("b.example")), Some("a.example"));
        assert_eq!(label.get_or_observe(None), Some("a.example"));
    }

    #[test]
    fn fixed_host_label_ignores_requests() {
        let label = HostLabel::fixed("svc.internal");
        assert_eq!(label.get_or_observe(Some("example.com")), Some("svc.internal"));
    }

    #[test]
    fn request_sample_builds_href() {
        let label = HostLabel::new();
        let info = RequestInfo::from_request(&get("/foo", Some("example.com")));
        let sample = sample_request(&info, &label, StartToken::now());
        assert_eq!(sample.host.as_deref(), Some("example.com"));
        assert_eq!(sample.href, "http://example.com/foo");
        assert_eq!(sample.path, "/foo");
    }

    #[test]
    fn same_host_for_every_path() {
        let label = HostLabel::new();
        let start = StartToken::now();
        let first = sample_request(
            &RequestInfo::from_request(&get("/a", Some("example.com"))),
            &label,
            start,
        );
        let second = sample_request(
            &RequestInfo::from_request(&get("/b", Some("127.0.0.1:3000"))),
            &label,
            start,
        );
        assert_eq!(first.host, second.host);
        assert_eq!(second.href, "http://example.com/b");
    }

    #[test]
    fn response_content_length_header() {
        let res = Response::builder()
            .status(200)
            .header(header::CONTENT_LENGTH, "42")
            .body(AxumBody::empty())
            .unwrap();
        let info = ResponseInfo::from_response(&res);
        assert_eq!(info.status, 200);
        assert_eq!(info.content_length, Some(42));
    }

    #[test]
    fn response_length_from_sized_body() {
        let res = Response::builder()
            .status(201)
            .body(AxumBody::from("hello"))
            .unwrap();
        assert_eq!(ResponseInfo::from_response(&res).content_length, Some(5));
    }

    #[test]
    fn streamed_body_has_no_length() {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>("a"), Ok("b")]);
        let res = Response::builder()
            .status(200)
            .body(AxumBody::from_stream(chunks))
            .unwrap();
        assert_eq!(ResponseInfo::from_response(&res).content_length, None);
    }

    #[test]
    fn no_content_has_no_length() {
        let res = Response::builder()
            .status(204)
            .body(AxumBody::empty())
            .unwrap();
        assert_eq!(ResponseInfo::from_response(&res).content_length, None);
    }

    #[test]
    fn response_delay_uses_request_start() {
        let start = StartToken::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let info = ResponseInfo {
            status: 200,
            content_length: None,
        };
        let sample = sample_response(&info, start);
        assert!(sample.delay.ns >= 2_000_000);
        assert_eq!(sample.content_length, None);
    }
}
