//! Per-IP connect limiter for the SSE endpoint.
//!
//! Sliding window: each IP may open `limit` connections in any rolling
//! `window`. Attempts over the limit are rejected without being recorded.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Fixed retry hint returned with a rejection.
pub const RETRY_AFTER_SECONDS: u64 = 60;

/// Rejection carrying the retry hint for the `Retry-After` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("too many connection attempts; retry after {retry_after_seconds}s")]
pub struct RateLimited {
    pub retry_after_seconds: u64,
}

pub struct ConnectRateLimiter {
    limit: usize,
    window: Duration,
    attempts: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl ConnectRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit: limit_per_window as usize,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter with a one-minute window.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), RateLimited> {
        self.check_at(ip, Instant::now())
    }

    /// Record an attempt from `ip` at `now`, or reject it if the window is full.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), RateLimited> {
        let mut attempts = self.lock();
        let history = attempts.entry(ip).or_default();

        while history
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) >= self.window)
        {
            history.pop_front();
        }

        if history.len() >= self.limit {
            return Err(RateLimited {
                retry_after_seconds: RETRY_AFTER_SECONDS,
            });
        }

        history.push_back(now);
        Ok(())
    }

    /// Forget IPs with no attempts inside the window. Returns how many were dropped.
    pub fn prune(&self, now: Instant) -> usize {
        let mut attempts = self.lock();
        let before = attempts.len();
        attempts.retain(|_, history| {
            history
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });
        before - attempts.len()
    }

    pub fn tracked_ips(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, VecDeque<Instant>>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));

    #[test]
    fn eleventh_attempt_in_a_minute_is_rejected() {
        let limiter = ConnectRateLimiter::per_minute(10);
        let start = Instant::now();

        for i in 0..10 {
            assert!(limiter.check_at(CLIENT, start + Duration::from_secs(i)).is_ok());
        }
        let rejected = limiter
            .check_at(CLIENT, start + Duration::from_secs(30))
            .unwrap_err();
        assert_eq!(rejected.retry_after_seconds, 60);

        // Other clients have their own window
        assert!(limiter.check_at(OTHER, start + Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn window_slides() {
        let limiter = ConnectRateLimiter::per_minute(2);
        let start = Instant::now();

        assert!(limiter.check_at(CLIENT, start).is_ok());
        assert!(limiter.check_at(CLIENT, start + Duration::from_secs(40)).is_ok());
        assert!(limiter.check_at(CLIENT, start + Duration::from_secs(50)).is_err());

        // The first attempt has left the window, the second has not
        assert!(limiter.check_at(CLIENT, start + Duration::from_secs(61)).is_ok());
        assert!(limiter.check_at(CLIENT, start + Duration::from_secs(62)).is_err());
    }

    #[test]
    fn prune_drops_idle_ips() {
        let limiter = ConnectRateLimiter::per_minute(5);
        let start = Instant::now();
        limiter.check_at(CLIENT, start).unwrap();
        limiter.check_at(OTHER, start + Duration::from_secs(30)).unwrap();

        assert_eq!(limiter.prune(start + Duration::from_secs(70)), 1);
        assert_eq!(limiter.tracked_ips(), 1);
    }
}
