use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";
pub const RESULT_SKIPPED: &str = "skipped";
pub const PUSH_RESULT_DELIVERED: &str = "delivered";
pub const PUSH_RESULT_FAILED: &str = "failed";
pub const PUSH_RESULT_EXPIRED: &str = "expired";

struct Metrics {
    registry: Registry,
    hk_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    repository_rows_served_total: IntCounterVec,
    push_deliveries_total: IntCounterVec,
    sync_runs_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let hk_up = IntGaugeVec::new(Opts::new("hk_up", "Service health"), &["service"])
            .expect("hk_up metric");

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP request count"),
            &["service", "route", "method", "status"],
        )
        .expect("http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["service", "route", "method", "status"],
        )
        .expect("http_request_duration_seconds metric");

        let repository_rows_served_total = IntCounterVec::new(
            Opts::new(
                "repository_rows_served_total",
                "Rows returned by the security-filtered repository",
            ),
            &["service", "table"],
        )
        .expect("repository_rows_served_total metric");

        let push_deliveries_total = IntCounterVec::new(
            Opts::new("push_deliveries_total", "Push deliveries by outcome"),
            &["service", "result"],
        )
        .expect("push_deliveries_total metric");

        let sync_runs_total = IntCounterVec::new(
            Opts::new("sync_runs_total", "Replica sync phase runs by outcome"),
            &["service", "phase", "result"],
        )
        .expect("sync_runs_total metric");

        registry
            .register(Box::new(hk_up.clone()))
            .expect("register hk_up");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry
            .register(Box::new(repository_rows_served_total.clone()))
            .expect("register repository_rows_served_total");
        registry
            .register(Box::new(push_deliveries_total.clone()))
            .expect("register push_deliveries_total");
        registry
            .register(Box::new(sync_runs_total.clone()))
            .expect("register sync_runs_total");

        Metrics {
            registry,
            hk_up,
            http_requests_total,
            http_request_duration_seconds,
            repository_rows_served_total,
            push_deliveries_total,
            sync_runs_total,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().hk_up.with_label_values(&[service_name]).set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_rows_served(service_name: &'static str, table: &str, rows: usize) {
    metrics()
        .repository_rows_served_total
        .with_label_values(&[service_name, table])
        .inc_by(rows as u64);
}

pub fn inc_push_delivery(service_name: &'static str, result: &str) {
    metrics()
        .push_deliveries_total
        .with_label_values(&[service_name, result])
        .inc();
}

pub fn inc_sync_run(service_name: &'static str, phase: &str, result: &str) {
    metrics()
        .sync_runs_total
        .with_label_values(&[service_name, phase, result])
        .inc();
}

pub fn metrics_response(service_name: &'static str) -> impl IntoResponse {
    init(service_name);
    let metric_families = metrics().registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}

#[derive(Clone)]
pub struct MetricsLayer {
    service_name: &'static str,
}

impl MetricsLayer {
    pub fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service_name: &'static str,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service_name: self.service_name,
        }
    }
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = axum::response::Response<ResBody>>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = axum::response::Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let service_name = self.service_name;
        let method = request.method().to_string();
        let route = request.uri().path().to_string();
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    record_http_request(
                        service_name,
                        &method,
                        &route,
                        response.status().as_u16(),
                        start.elapsed(),
                    );
                    Ok(response)
                }
                Err(err) => {
                    record_http_request(service_name, &method, &route, 500, start.elapsed());
                    Err(err)
                }
            }
        })
    }
}
