//! Fixed-window rate limiting per client address.
//!
//! Applied to every route ahead of authentication. Responses carry the standard
//! `RateLimit-*` headers; rejected requests also get `Retry-After`.

use crate::api::ErrorResponse;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Tracked clients before expired windows are pruned
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl RateLimitDecision {
    fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request from `client` and decide whether it may proceed.
    pub fn check(&self, client: IpAddr) -> RateLimitDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateLimitDecision {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);

        RateLimitDecision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(now.duration_since(entry.started)),
        }
    }

    fn apply_headers(&self, decision: &RateLimitDecision, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", decision.limit, self.window.as_secs());
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY, value);
        }
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
    }
}

/// Client address from the connection, or a shared bucket when unknown
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware
pub async fn enforce(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let client = client_ip(&req);
    let decision = limiter.check(client);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        tracing::warn!(%client, path = %req.uri().path(), "Rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("Too many requests, please try again later.")),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(decision.reset_secs()));
        response
    };

    limiter.apply_headers(&decision, response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        let remaining: Vec<_> = (0..3).map(|_| limiter.check_at(ip(1), now)).collect();
        assert!(remaining.iter().all(|d| d.allowed));
        assert_eq!(
            remaining.iter().map(|d| d.remaining).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );

        let rejected = limiter.check_at(ip(1), now + Duration::from_secs(10));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_after, Duration::from_secs(50));
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).allowed);
        assert!(!limiter.check_at(ip(1), now).allowed);
        assert!(limiter.check_at(ip(2), now).allowed);
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).allowed);
        assert!(!limiter.check_at(ip(1), now + Duration::from_secs(59)).allowed);

        let fresh = limiter.check_at(ip(1), now + Duration::from_secs(60));
        assert!(fresh.allowed);
        assert_eq!(fresh.reset_after, Duration::from_secs(60));
    }

    #[test]
    fn test_reset_rounds_up_to_whole_seconds() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 60,
            remaining: 10,
            reset_after: Duration::from_millis(1500),
        };
        assert_eq!(decision.reset_secs(), 2);
    }

    #[test]
    fn test_headers() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));
        let decision = limiter.check_at(ip(1), Instant::now());

        let mut headers = HeaderMap::new();
        limiter.apply_headers(&decision, &mut headers);

        assert_eq!(headers[RATELIMIT_POLICY], "60;w=60");
        assert_eq!(headers[RATELIMIT_LIMIT], "60");
        assert_eq!(headers[RATELIMIT_REMAINING], "59");
        assert_eq!(headers[RATELIMIT_RESET], "60");
        assert!(!headers.contains_key("x-ratelimit-limit"));
    }
}
