use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allowed(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after: None,
        }
    }

    pub fn limited(limit: u32, reset_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after: Some(reset_after),
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.limit == 0 {
            return headers;
        }

        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            header_value(self.limit as u64),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            header_value(self.remaining as u64),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            header_value(duration_to_seconds(self.reset_after)),
        );
        if let Some(retry_after) = self.retry_after {
            headers.insert(RETRY_AFTER, header_value(duration_to_seconds(retry_after)));
        }

        headers
    }
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("valid header value")
}

fn duration_to_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    let mut rounded = if duration.subsec_nanos() == 0 {
        secs
    } else {
        secs + 1
    };
    if rounded == 0 {
        rounded = 1;
    }
    rounded
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter keyed by client IP. A capacity of zero disables
/// limiting entirely.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    capacity: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            window,
        }
    }

    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        if self.capacity == 0 {
            return RateLimitDecision::allowed(0, 0, Duration::ZERO);
        }

        let now = Instant::now();
        let mut windows = self.windows.lock().expect("limiter poisoned");

        let window = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(window.started));
        if window.count >= self.capacity {
            return RateLimitDecision::limited(self.capacity, reset_after);
        }

        window.count += 1;
        RateLimitDecision::allowed(self.capacity, self.capacity - window.count, reset_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
    }

    #[tokio::test]
    async fn windows_are_tracked_per_ip() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check(ip(1)).allowed);
        assert!(!limiter.check(ip(1)).allowed);
        assert!(limiter.check(ip(2)).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_the_interval() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(10));

        assert!(limiter.check(ip(1)).allowed);
        assert!(limiter.check(ip(1)).allowed);
        let denied = limiter.check(ip(1));
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check(ip(1)).allowed);
    }

    #[tokio::test]
    async fn zero_capacity_disables_limiting() {
        let limiter = FixedWindowLimiter::per_minute(0);
        for _ in 0..100 {
            assert!(limiter.check(ip(1)).allowed);
        }
        assert!(limiter.check(ip(1)).headers().is_empty());
    }

    #[test]
    fn limited_headers_include_retry_after() {
        let decision = RateLimitDecision::limited(5, Duration::from_millis(1500));
        let headers = decision.headers();

        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get(RETRY_AFTER).unwrap(), "2");
    }
}
