//! Test utilities for database and HTTP testing.
//!
//! Sets up in-memory SQLite databases with migrations applied, builds the
//! application router against them, and signs webhook payloads the way each
//! provider does.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use chrono::Utc;
use creditsync::config::AppConfig;
use creditsync::models::user;
use creditsync::repositories::UserRepository;
use creditsync::server::{AppState, create_app};
use hmac::{Hmac, Mac};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;

pub const STRIPE_SECRET: &str = "whsec_test_secret";
pub const SQUARE_KEY: &str = "square-signature-key";
pub const SQUARE_URL: &str = "https://billing.example.test/webhooks/square";
pub const BACKEND_SECRET: &str = "backend-shared-secret";
pub const OPERATOR_TOKEN: &str = "operator-test-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Sets up an in-memory SQLite database and returns it behind an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Test profile configuration with every provider secret and an operator token set.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        webhook_stripe_secret: Some(STRIPE_SECRET.to_string()),
        webhook_square_signature_key: Some(SQUARE_KEY.to_string()),
        webhook_square_notification_url: Some(SQUARE_URL.to_string()),
        webhook_backend_secret: Some(BACKEND_SECRET.to_string()),
        ..Default::default()
    }
}

/// Application state plus router over a fresh database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let db = setup_test_db().await?;
        let state = AppState::new(Arc::new(config), db);
        let router = create_app(state.clone());
        Ok(Self { state, router })
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(Arc::clone(&self.state.db))
    }

    pub async fn create_user(&self, email: &str) -> Result<user::Model> {
        Ok(self.users().create(email, Utc::now()).await?)
    }

    pub async fn user(&self, email: &str) -> Result<user::Model> {
        self.users()
            .find_by_email(email)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {email} not found"))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str, parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

pub fn backend_signature(body: &str) -> String {
    format!("sha256={}", hex::encode(mac(BACKEND_SECRET, &[body.as_bytes()])))
}

pub fn stripe_signature(body: &str) -> String {
    let timestamp = Utc::now().timestamp().to_string();
    let signature = mac(
        STRIPE_SECRET,
        &[timestamp.as_bytes(), b".", body.as_bytes()],
    );
    format!("t={timestamp},v1={}", hex::encode(signature))
}

pub fn square_signature(body: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .encode(mac(SQUARE_KEY, &[SQUARE_URL.as_bytes(), body.as_bytes()]))
}

/// Signed `POST /webhooks/{provider}` request.
pub fn webhook_request(provider: &str, body: &Value) -> Request<Body> {
    let body = body.to_string();
    let (header, signature) = match provider {
        "stripe" => ("stripe-signature", stripe_signature(&body)),
        "square" => ("x-square-hmacsha256-signature", square_signature(&body)),
        _ => ("x-webhook-signature", backend_signature(&body)),
    };

    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{provider}"))
        .header("content-type", "application/json")
        .header(header, signature)
        .body(Body::from(body))
        .unwrap()
}

/// Operator-authenticated request.
pub fn operator_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {OPERATOR_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
