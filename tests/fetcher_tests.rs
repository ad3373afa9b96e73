// Fetcher tests against a local axum server: auth header, error
// classification per status class, body parsing.

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dashcore::error::DashboardError;
use dashcore::fetcher::{HttpSampleFetcher, METRICS_PATH, MetricsSource};
use serde_json::json;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn feed_body() -> serde_json::Value {
    json!({
        "metrics": [
            {
                "timestamp": 1000,
                "cpuUsage": "42.5",
                "memoryUsage": 60.0,
                "diskUsage": 70.0,
                "activeConnections": 5,
                "authenticatedConnections": 3,
                "anonymousConnections": 2,
                "avgConnectionDuration": 120.0,
                "endpoint": "/api/users",
                "httpStatus": 200,
                "clientIp": "10.0.0.1",
                "authenticated": true
            }
        ],
        "summary": {}
    })
}

fn fetcher(base: &str) -> HttpSampleFetcher {
    HttpSampleFetcher::new(base, Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn fetch_sends_bearer_token_and_parses_the_feed() {
    let app = Router::new().route(
        METRICS_PATH,
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if auth == "Bearer tok-1" {
                Json(feed_body()).into_response()
            } else {
                (StatusCode::UNAUTHORIZED, Json(json!({"detail": "nope"}))).into_response()
            }
        }),
    );
    let base = serve(app).await;

    let samples = fetcher(&base).fetch("tok-1").await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].endpoint, "/api/users");
    assert_eq!(samples[0].client_ip, "10.0.0.1");
    assert_eq!(samples[0].cpu_usage.as_f64(), Some(42.5));

    let err = fetcher(&base).fetch("wrong").await.unwrap_err();
    assert_eq!(err, DashboardError::Auth { status: 401 });
}

#[tokio::test]
async fn empty_token_is_rejected_without_a_request() {
    // Nothing listens here; an issued request would be a network error.
    let err = fetcher("http://127.0.0.1:1").fetch("").await.unwrap_err();
    assert_eq!(err, DashboardError::Auth { status: 401 });
}

#[tokio::test]
async fn forbidden_maps_to_auth() {
    let app = Router::new().route(
        METRICS_PATH,
        get(|| async { (StatusCode::FORBIDDEN, Json(json!({"detail": "no role"}))) }),
    );
    let base = serve(app).await;
    let err = fetcher(&base).fetch("tok").await.unwrap_err();
    assert_eq!(err, DashboardError::Auth { status: 403 });
}

#[tokio::test]
async fn server_errors_map_to_network_with_detail() {
    let app = Router::new().route(
        METRICS_PATH,
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "db down"})),
            )
        }),
    );
    let base = serve(app).await;
    let err = fetcher(&base).fetch("tok").await.unwrap_err();
    assert_eq!(err, DashboardError::Network("db down".to_string()));
}

#[tokio::test]
async fn other_client_errors_map_to_protocol() {
    let app = Router::new().route(
        METRICS_PATH,
        get(|| async { (StatusCode::NOT_FOUND, "plain text, not json") }),
    );
    let base = serve(app).await;
    let err = fetcher(&base).fetch("tok").await.unwrap_err();
    assert_eq!(err, DashboardError::Protocol("status 404".to_string()));
}

#[tokio::test]
async fn non_json_success_body_maps_to_protocol() {
    let app = Router::new().route(METRICS_PATH, get(|| async { "<html>oops</html>" }));
    let base = serve(app).await;
    let err = fetcher(&base).fetch("tok").await.unwrap_err();
    assert!(matches!(err, DashboardError::Protocol(_)));
}

#[tokio::test]
async fn connection_refused_maps_to_network() {
    let err = fetcher("http://127.0.0.1:1").fetch("tok").await.unwrap_err();
    assert!(matches!(err, DashboardError::Network(_)));
}
