//! SSE endpoint tests through the HTTP router.

#[path = "test_utils/mod.rs"]
mod test_utils;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use creditsync::config::{AppConfig, SseConfig};
use futures::StreamExt;
use test_utils::{TestApp, test_config};

fn stream_request(ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/events/stream")
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn first_event_is_connected() {
    let app = TestApp::new().await.unwrap();

    let response = app.send(stream_request("198.51.100.20")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(app.state.hub.connection_count(), 1);

    let mut body = response.into_body().into_data_stream();
    let chunk = body.next().await.unwrap().unwrap();
    let chunk = String::from_utf8(chunk.to_vec()).unwrap();

    let json = chunk
        .trim()
        .strip_prefix("data: ")
        .expect("SSE data line");
    let message: serde_json::Value = serde_json::from_str(json).unwrap();
    assert_eq!(message["type"], "connected");
    assert!(message["client_id"].as_str().is_some());

    drop(body);
    assert_eq!(app.state.hub.connection_count(), 0);
}

#[tokio::test]
async fn eleventh_connection_in_a_minute_is_rate_limited() {
    let app = TestApp::new().await.unwrap();
    let mut open = Vec::new();

    for _ in 0..10 {
        let response = app.send(stream_request("203.0.113.50")).await;
        assert_eq!(response.status(), StatusCode::OK);
        open.push(response);
    }

    let response = app.send(stream_request("203.0.113.50")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "60");

    // Another address is unaffected
    let response = app.send(stream_request("203.0.113.51")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn limit_follows_configuration() {
    let config = AppConfig {
        sse: SseConfig {
            connect_rate_limit_per_minute: 2,
            ..Default::default()
        },
        ..test_config()
    };
    let app = TestApp::with_config(config).await.unwrap();

    assert_eq!(app.send(stream_request("192.0.2.1")).await.status(), StatusCode::OK);
    assert_eq!(app.send(stream_request("192.0.2.1")).await.status(), StatusCode::OK);
    assert_eq!(
        app.send(stream_request("192.0.2.1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
