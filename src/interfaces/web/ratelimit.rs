use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::AppState;
use super::error::ApiError;
use crate::core::clock::Clock;
use crate::core::error::CoreError;

/// Prune the timestamp map every this many requests so spoofed source
/// addresses cannot grow it without bound.
const CLEANUP_INTERVAL: u64 = 100;

/// Per-IP sliding window over write requests. Reads pass untouched.
pub struct IpRateLimiter {
    window_ms: u64,
    max_requests: u32,
    clock: Clock,
    state: Mutex<HashMap<IpAddr, Vec<u64>>>,
    request_count: AtomicU64,
}

impl IpRateLimiter {
    pub fn new(window_ms: u64, max_requests: u32, clock: Clock) -> Self {
        Self {
            window_ms,
            max_requests,
            clock,
            state: Mutex::new(HashMap::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// `Ok` records the request; `Err` carries the seconds until the oldest
    /// recorded request leaves the window.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(self.window_ms);

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % CLEANUP_INTERVAL == 0 {
            self.cleanup(cutoff);
        }

        let mut state = self.state.lock().unwrap();
        let timestamps = state.entry(ip).or_default();
        timestamps.retain(|&t| t > cutoff);

        if timestamps.len() >= self.max_requests as usize {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after_ms = (oldest + self.window_ms).saturating_sub(now);
            return Err(retry_after_ms.div_ceil(1000).max(1));
        }
        timestamps.push(now);
        Ok(())
    }

    fn cleanup(&self, cutoff: u64) {
        let mut state = self.state.lock().unwrap();
        state.retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            !timestamps.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.state.lock().unwrap().len()
    }
}

pub async fn limit_writes(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let is_write = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    if !is_write {
        return next.run(req).await;
    }

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let Some(ip) = ip else {
        // No socket info (e.g. in-process test client); let it through.
        return next.run(req).await;
    };

    match state.limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => {
            warn!("rate limit exceeded for {ip} on {}", req.uri().path());
            ApiError(CoreError::RateLimited { retry_after_secs }).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_the_cap_then_rejects() {
        let limiter = IpRateLimiter::new(60_000, 3, Clock::new());
        for _ in 0..3 {
            assert!(limiter.check(ip(1)).is_ok());
        }
        let retry = limiter.check(ip(1)).unwrap_err();
        assert!(retry >= 1 && retry <= 60);
        // Another address has its own budget.
        assert!(limiter.check(ip(2)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = IpRateLimiter::new(1_000, 2, Clock::new());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        assert!(limiter.check(ip(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_prunes_expired_entries() {
        let limiter = IpRateLimiter::new(1_000, 10, Clock::new());
        for i in 0..50 {
            limiter.check(ip(i)).unwrap();
        }
        assert_eq!(limiter.tracked_ips(), 50);

        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        for i in 50..110 {
            limiter.check(ip(i)).unwrap();
        }
        assert!(limiter.tracked_ips() <= 61);
    }
}
