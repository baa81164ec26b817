use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the prometheus recorder and add its endpoint and middleware to a router, should be
/// called last. `service` tells the listener's and notifier's series apart.
pub fn setup_metrics_routes(router: Router, service: &'static str) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(add_metrics_routes(router, recorder_handle, service))
}

fn add_metrics_routes(
    router: Router,
    recorder_handle: PrometheusHandle,
    service: &'static str,
) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn_with_state(service, track_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Outbound ITSM calls can be slow, so the buckets reach further than request latencies need.
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Middleware to record request counts and latencies per route, labelled with the relay service.
pub async fn track_metrics(
    State(service): State<&'static str>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("service", service.to_owned()),
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!("relay_http_requests_total", &labels).increment(1);
    metrics::histogram!("relay_http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt; // for `oneshot`

    // The only test in this crate that installs the global recorder.
    #[tokio::test]
    async fn requests_are_counted_per_service_and_route() {
        let handle = setup_metrics_recorder().expect("failed to install recorder");
        let router = Router::new().route("/webhook", axum::routing::post(|| async { "{}" }));
        let app = add_metrics_routes(router, handle.clone(), "relay-listener");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rendered = handle.render();
        let line = rendered
            .lines()
            .find(|line| line.starts_with("relay_http_requests_total{"))
            .expect("request counter was not rendered");
        assert!(line.contains(r#"service="relay-listener""#));
        assert!(line.contains(r#"path="/webhook""#));
        assert!(line.contains(r#"status="200""#));
        assert!(line.ends_with(" 1"));
    }
}
