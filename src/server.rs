//! # Server Configuration
//!
//! Router assembly, shared application state and the HTTP server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::events::EventDispatcher;
use crate::handlers;
use crate::notifications::{ConnectRateLimiter, HubSettings, NotificationHub};
use crate::processor::WebhookProcessor;
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub hub: Arc<NotificationHub>,
    pub limiter: Arc<ConnectRateLimiter>,
    pub processor: Arc<WebhookProcessor>,
}

impl AppState {
    /// Build the state with the default event handlers registered.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        let dispatcher = EventDispatcher::with_default_handlers(&config.billing);
        Self::with_dispatcher(config, db, dispatcher)
    }

    pub fn with_dispatcher(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        dispatcher: EventDispatcher,
    ) -> Self {
        let db = Arc::new(db);
        let hub = Arc::new(NotificationHub::new(HubSettings::from(&config.sse)));
        let limiter = Arc::new(ConnectRateLimiter::per_minute(
            config.sse.connect_rate_limit_per_minute,
        ));
        let processor = Arc::new(WebhookProcessor::new(
            Arc::clone(&db),
            dispatcher,
            Arc::clone(&hub),
            &config.billing,
        ));

        Self {
            config,
            db,
            hub,
            limiter,
            processor,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/webhook-events",
            get(handlers::admin::list_webhook_events),
        )
        .route(
            "/admin/webhook-events/{id}/replay",
            post(handlers::admin::replay_webhook_event),
        )
        .route(
            "/admin/maintenance/purge",
            post(handlers::admin::purge_expired),
        )
        .route(
            "/admin/users/{email}/credits",
            get(handlers::admin::user_credits),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/webhooks/{provider}", post(handlers::webhooks::receive_webhook))
        .route("/events/stream", get(handlers::stream::event_stream))
        .merge(admin)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Serve `state` until `shutdown` fires.
pub async fn run_server(
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    // Resolve the configured bind address
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = state.config.profile.clone();

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::stream::event_stream,
        crate::handlers::admin::list_webhook_events,
        crate::handlers::admin::replay_webhook_event,
        crate::handlers::admin::purge_expired,
        crate::handlers::admin::user_credits,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAck,
            crate::handlers::webhooks::WebhookErrorBody,
            crate::handlers::admin::WebhookEventView,
            crate::handlers::admin::WebhookEventListResponse,
            crate::handlers::admin::ReplayResponse,
            crate::handlers::admin::LedgerEntryView,
            crate::handlers::admin::UserCreditsResponse,
            crate::maintenance::PurgeReport,
            crate::repositories::WebhookEventState,
            crate::repositories::user::CreditReconciliation,
            crate::repositories::user::ReconciliationState,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "creditsync API",
        description = "Idempotent billing webhooks, credit reconciliation and task notifications",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
