//! # Notification Stream
//!
//! `GET /events/stream` server-sent events endpoint backed by the
//! [`NotificationHub`](crate::notifications::NotificationHub).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap},
    response::sse::{Event, Sse},
};
use futures::{Stream, StreamExt};
use metrics::counter;
use tracing::{info, warn};

use crate::error::{ApiError, rate_limited};
use crate::server::AppState;

/// Client address used for rate limiting.
///
/// Honors the first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket
/// peer address.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    };

    let peer = || {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    forwarded
        .or_else(real_ip)
        .or_else(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Subscribe to task notifications
#[utoipa::path(
    get,
    path = "/events/stream",
    responses(
        (status = 200, description = "text/event-stream of JSON messages typed connected, ping, task_completed, task_failed or task_progress", content_type = "text/event-stream", body = String),
        (status = 429, description = "Too many connection attempts from this address", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn event_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let ip = client_ip(&headers, &extensions);

    if let Err(limited) = state.limiter.check(ip) {
        counter!("sse_connections_rejected_total").increment(1);
        warn!(%ip, "SSE connection rate limit exceeded");
        return Err(rate_limited(
            "Too many connection attempts",
            limited.retry_after_seconds,
        ));
    }

    let stream = state.hub.connect();
    info!(client_id = %stream.client_id(), %ip, "Opened notification stream");

    Ok(Sse::new(
        stream.map(|message| Event::default().json_data(&message)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert_eq!(
            client_ip(&headers, &extensions),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 4000))));

        assert_eq!(
            client_ip(&headers, &extensions),
            "192.0.2.4".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            client_ip(&headers, &Extensions::new()),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }
}
