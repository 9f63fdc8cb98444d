//! # Maintenance Worker
//!
//! Background loop that pings SSE connections on the heartbeat interval,
//! prunes idle rate-limit buckets, and purges expired idempotency records and
//! webhook events on the maintenance interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::notifications::{ConnectRateLimiter, NotificationHub};
use crate::repositories::{IdempotencyRepository, WebhookEventRepository};

/// Rows removed by one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurgeReport {
    pub idempotency_records: u64,
    pub webhook_events: u64,
}

/// Delete expired idempotency records and webhook events.
pub async fn run_purge(
    db: &Arc<DatabaseConnection>,
    now: DateTime<Utc>,
) -> Result<PurgeReport, DbErr> {
    let idempotency_records = IdempotencyRepository::new(Arc::clone(db))
        .purge_expired(now)
        .await?;
    let webhook_events = WebhookEventRepository::new(Arc::clone(db))
        .purge_expired(now)
        .await?;

    counter!("maintenance_purged_records_total", "table" => "idempotency_records")
        .increment(idempotency_records);
    counter!("maintenance_purged_records_total", "table" => "webhook_events")
        .increment(webhook_events);

    Ok(PurgeReport {
        idempotency_records,
        webhook_events,
    })
}

pub struct MaintenanceWorker {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    hub: Arc<NotificationHub>,
    limiter: Arc<ConnectRateLimiter>,
}

impl MaintenanceWorker {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        hub: Arc<NotificationHub>,
        limiter: Arc<ConnectRateLimiter>,
    ) -> Self {
        Self {
            config,
            db,
            hub,
            limiter,
        }
    }

    /// Run until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        let heartbeat_every = Duration::from_secs(self.config.sse.heartbeat_interval_seconds);
        let purge_every = Duration::from_secs(self.config.billing.maintenance_interval_seconds);
        info!(
            heartbeat_seconds = heartbeat_every.as_secs(),
            purge_seconds = purge_every.as_secs(),
            "Starting maintenance worker"
        );

        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge = interval_at(Instant::now() + purge_every, purge_every);
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Maintenance worker shutdown requested");
                    break;
                }
                _ = heartbeat.tick() => self.heartbeat_tick(),
                _ = purge.tick() => self.purge_tick().await,
            }
        }

        info!("Maintenance worker stopped");
    }

    fn heartbeat_tick(&self) {
        let now = Instant::now();
        let report = self.hub.heartbeat_at(now);
        let pruned = self.limiter.prune(now);
        debug!(
            delivered = report.delivered,
            evicted = report.evicted,
            remaining = report.remaining,
            pruned_ips = pruned,
            "Heartbeat tick completed"
        );
    }

    async fn purge_tick(&self) {
        let started = Instant::now();
        match run_purge(&self.db, Utc::now()).await {
            Ok(report) => info!(
                idempotency_records = report.idempotency_records,
                webhook_events = report.webhook_events,
                "Purged expired records"
            ),
            Err(err) => error!(error = ?err, "Maintenance purge failed"),
        }
        histogram!("maintenance_purge_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{HubSettings, SseMessage};
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn pings_connections_and_stops_on_cancel() {
        let config = Arc::new(AppConfig::default());
        let hub = Arc::new(NotificationHub::new(HubSettings::from(&config.sse)));
        let worker = MaintenanceWorker::new(
            Arc::clone(&config),
            Arc::new(DatabaseConnection::default()),
            Arc::clone(&hub),
            Arc::new(ConnectRateLimiter::per_minute(10)),
        );

        let mut stream = hub.connect();
        assert!(matches!(stream.next().await, Some(SseMessage::Connected { .. })));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(stream.next().await, Some(SseMessage::Ping { .. })));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
