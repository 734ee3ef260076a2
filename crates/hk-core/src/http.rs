use axum::extract::DefaultBodyLimit;
use axum::http::header::HeaderName;
use axum::http::Request;
use axum::Router;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{Level, Span};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request size and duration bounds for a service.
///
/// Task attachments are uploaded as multipart parts from handheld devices on
/// hotel Wi-Fi, so both bounds sit well above what the JSON routes need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpLimits {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            // one photo attachment plus the row's form fields
            max_body_bytes: 16 * 1024 * 1024,
            request_timeout: Duration::from_secs(120),
        }
    }
}

fn request_span<B>(service_name: &'static str, request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "http.request",
        service = service_name,
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id
    )
}

/// Wraps `router` with request ids, tracing, metrics and the given limits.
pub fn apply_standard_layers(
    router: Router,
    service_name: &'static str,
    limits: HttpLimits,
) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(move |request: &Request<_>| request_span(service_name, request))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    router
        .layer(crate::metrics::MetricsLayer::new(service_name))
        .layer(trace)
        .layer(TimeoutLayer::new(limits.request_timeout))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limits.max_body_bytes))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}
