//! Operator API tests.

#[path = "test_utils/mod.rs"]
mod test_utils;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use creditsync::repositories::{CreditSource, IdempotencyRepository, WebhookEventRepository};
use serde_json::json;
use std::sync::Arc;
use test_utils::{TestApp, json_body, operator_request, webhook_request};

#[tokio::test]
async fn admin_routes_require_operator_token() {
    let app = TestApp::new().await.unwrap();

    let anonymous = Request::builder()
        .uri("/admin/webhook-events")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(anonymous).await.status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .method("POST")
        .uri("/admin/maintenance/purge")
        .header("authorization", "Bearer not-the-token")
        .body(Body::empty())
        .unwrap();
    let response = app.send(wrong).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn lists_events_filtered_by_status_and_provider() {
    let app = TestApp::new().await.unwrap();
    app.create_user("ok@example.com").await.unwrap();

    let ok = json!({
        "event_id": "evt_ok",
        "type": "payment.updated",
        "data": { "email": "ok@example.com", "status": "completed", "credits": 10 }
    });
    let broken = json!({
        "event_id": "evt_broken",
        "type": "payment.updated",
        "data": { "email": "nobody@example.com", "status": "completed", "credits": 10 }
    });
    app.send(webhook_request("backend", &ok)).await;
    app.send(webhook_request("backend", &broken)).await;

    let response = app
        .send(operator_request("GET", "/admin/webhook-events?status=failed"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_id"], "evt_broken");
    assert_eq!(events[0]["status"], "failed");
    assert!(events[0]["error"].as_str().is_some());

    let response = app
        .send(operator_request(
            "GET",
            "/admin/webhook-events?status=processed&provider=backend&limit=5",
        ))
        .await;
    let body = json_body(response).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["event_id"], "evt_ok");

    let response = app
        .send(operator_request("GET", "/admin/webhook-events?provider=paypal"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(operator_request("GET", "/admin/webhook-events?limit=0"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(operator_request("GET", "/admin/webhook-events?status=bogus"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn replay_of_unknown_event_is_404() {
    let app = TestApp::new().await.unwrap();
    let response = app
        .send(operator_request(
            "POST",
            &format!("/admin/webhook-events/{}/replay", uuid::Uuid::new_v4()),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purge_removes_only_expired_records() {
    let app = TestApp::new().await.unwrap();
    let db = Arc::clone(&app.state.db);
    let long_ago = Utc::now() - Duration::days(60);

    let idempotency = IdempotencyRepository::new(Arc::clone(&db));
    idempotency
        .start_processing("old", "backend", "webhook", Duration::hours(24), None, long_ago)
        .await
        .unwrap();
    idempotency
        .start_processing("fresh", "backend", "webhook", Duration::hours(24), None, Utc::now())
        .await
        .unwrap();

    let events = WebhookEventRepository::new(Arc::clone(&db));
    events
        .record_received("backend", "evt_old", "payment.updated", json!({}), Duration::days(30), long_ago)
        .await
        .unwrap();

    let response = app
        .send(operator_request("POST", "/admin/maintenance/purge"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "idempotency_records": 1, "webhook_events": 1 })
    );

    assert!(
        idempotency
            .check("fresh", "backend", "webhook", Utc::now())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn user_credits_reports_reconciliation() {
    let app = TestApp::new().await.unwrap();
    let user = app.create_user("ledger@example.com").await.unwrap();
    let source = CreditSource {
        reason: "payment.updated".to_string(),
        provider: "backend".to_string(),
        event_id: "evt_l1".to_string(),
    };
    app.users()
        .grant_credits(user.id, 120, &source, Utc::now())
        .await
        .unwrap();

    let response = app
        .send(operator_request("GET", "/admin/users/LEDGER@example.com/credits"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["credit_balance"], 120);
    assert_eq!(body["reconciliation"]["state"], "in_sync");
    assert_eq!(body["reconciliation"]["ledger_total"], 120);
    assert_eq!(body["recent_ledger"].as_array().unwrap().len(), 1);

    let response = app
        .send(operator_request("GET", "/admin/users/missing@example.com/credits"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
