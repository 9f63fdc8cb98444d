//! Connection hub
//!
//! Process-local registry of open SSE connections. Each connection owns a
//! bounded channel; the hub pushes pings on the heartbeat interval, evicts
//! connections that stopped accepting pushes or outlived their maximum age,
//! and fans task notifications out to everyone still connected.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SseConfig;
use crate::notifications::SseMessage;

/// Timing and buffering limits for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    pub max_connection_age: Duration,
    pub channel_capacity: usize,
}

impl From<&SseConfig> for HubSettings {
    fn from(config: &SseConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            stale_after: Duration::from_secs(config.stale_after_seconds),
            max_connection_age: Duration::from_secs(config.max_connection_age_seconds),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&SseConfig::default())
    }
}

struct Connection {
    sender: mpsc::Sender<SseMessage>,
    last_heartbeat: Instant,
    created_at: Instant,
}

/// Outcome of a broadcast or heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub evicted: usize,
    pub remaining: usize,
}

/// Registry of live SSE connections keyed by client id
pub struct NotificationHub {
    settings: HubSettings,
    connections: Mutex<HashMap<Uuid, Connection>>,
}

impl NotificationHub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            settings,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Register a new connection and queue its `connected` message.
    pub fn connect(self: &Arc<Self>) -> ConnectionStream {
        self.connect_at(Instant::now())
    }

    pub fn connect_at(self: &Arc<Self>, now: Instant) -> ConnectionStream {
        let client_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.settings.channel_capacity);

        // A fresh channel always has room for the greeting
        let _ = sender.try_send(SseMessage::Connected {
            client_id: client_id.to_string(),
            timestamp: Utc::now(),
        });

        let active = {
            let mut connections = self.lock();
            connections.insert(
                client_id,
                Connection {
                    sender,
                    last_heartbeat: now,
                    created_at: now,
                },
            );
            connections.len()
        };

        counter!("sse_connections_opened_total").increment(1);
        gauge!("sse_connections_active").set(active as f64);
        info!(%client_id, active, "SSE client connected");

        ConnectionStream {
            client_id,
            inner: ReceiverStream::new(receiver),
            deadline: Box::pin(sleep_until(now + self.settings.max_connection_age)),
            hub: Arc::clone(self),
        }
    }

    /// Drop a connection immediately (client went away).
    pub fn disconnect(&self, client_id: Uuid) {
        let (removed, active) = {
            let mut connections = self.lock();
            let removed = connections.remove(&client_id).is_some();
            (removed, connections.len())
        };

        if removed {
            gauge!("sse_connections_active").set(active as f64);
            debug!(%client_id, active, "SSE client disconnected");
        }
    }

    /// Drop every connection so open streams end; used on shutdown.
    pub fn disconnect_all(&self) -> usize {
        let removed = {
            let mut connections = self.lock();
            let removed = connections.len();
            connections.clear();
            removed
        };
        gauge!("sse_connections_active").set(0.0);
        info!(removed, "Closed all SSE connections");
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_connected(&self, client_id: Uuid) -> bool {
        self.lock().contains_key(&client_id)
    }

    /// Push a message to every live connection.
    pub fn broadcast(&self, message: &SseMessage) -> SweepReport {
        self.broadcast_at(message, Instant::now())
    }

    /// Push a message to every connection that is neither stale nor expired at `now`.
    ///
    /// Stale connections and connections whose channel rejects the push are
    /// collected during the pass and removed afterwards.
    pub fn broadcast_at(&self, message: &SseMessage, now: Instant) -> SweepReport {
        self.sweep(now, message, false)
    }

    /// Send a `ping` to every connection, refreshing the heartbeat of those that accept it.
    pub fn heartbeat(&self) -> SweepReport {
        self.heartbeat_at(Instant::now())
    }

    pub fn heartbeat_at(&self, now: Instant) -> SweepReport {
        let ping = SseMessage::Ping {
            timestamp: Utc::now(),
        };
        self.sweep(now, &ping, true)
    }

    fn sweep(&self, now: Instant, message: &SseMessage, refresh_heartbeat: bool) -> SweepReport {
        let mut report = SweepReport::default();
        let mut stale = Vec::new();

        let mut connections = self.lock();
        for (client_id, connection) in connections.iter_mut() {
            let silent_for = now.saturating_duration_since(connection.last_heartbeat);
            let age = now.saturating_duration_since(connection.created_at);
            if silent_for > self.settings.stale_after || age >= self.settings.max_connection_age {
                stale.push(*client_id);
                continue;
            }

            match connection.sender.try_send(message.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    if refresh_heartbeat {
                        connection.last_heartbeat = now;
                    }
                }
                Err(_) => stale.push(*client_id),
            }
        }

        for client_id in &stale {
            connections.remove(client_id);
        }
        report.evicted = stale.len();
        report.remaining = connections.len();
        drop(connections);

        if report.evicted > 0 {
            counter!("sse_connections_evicted_total").increment(report.evicted as u64);
            info!(
                evicted = report.evicted,
                remaining = report.remaining,
                message_type = message.kind(),
                "Evicted stale SSE connections"
            );
        }
        gauge!("sse_connections_active").set(report.remaining as f64);

        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Stream of messages for one client.
///
/// Ends when the hub drops the connection or the maximum age elapses, and
/// unregisters itself when dropped.
pub struct ConnectionStream {
    client_id: Uuid,
    inner: ReceiverStream<SseMessage>,
    deadline: Pin<Box<Sleep>>,
    hub: Arc<NotificationHub>,
}

impl ConnectionStream {
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}

impl Stream for ConnectionStream {
    type Item = SseMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ConnectionStream {
    fn drop(&mut self) {
        self.hub.disconnect(self.client_id);
    }
}
