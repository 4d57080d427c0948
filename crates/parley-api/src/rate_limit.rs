//! Fixed-window request limiter for the JSON endpoints.
//!
//! Counts requests per wall-clock second across all clients. Streaming chat
//! routes are mounted outside this layer so long-lived SSE connections and
//! stop requests are never throttled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::error::ErrorBody;

/// Shared limiter state.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_per_sec: u64,
    count: Arc<AtomicU64>,
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    /// Allow `max_per_sec` requests per second. Zero disables limiting.
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Try to admit one request in the window starting at `now`.
    fn try_acquire_at(&self, now: u64) -> bool {
        if self.max_per_sec == 0 {
            return true;
        }
        let current = self.window.load(Ordering::Acquire);
        if now > current
            && self
                .window
                .compare_exchange(current, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // This request opened the new window.
            self.count.store(1, Ordering::Release);
            return true;
        }
        self.count.fetch_add(1, Ordering::AcqRel) < self.max_per_sec
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Self::now_secs())
    }
}

/// Axum middleware that enforces the limit.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        return next.run(req).await;
    }
    debug!(path = %req.uri().path(), "Rate limit exceeded");
    let body = ErrorBody {
        error: "too_many_requests".to_string(),
        message: "Rate limit exceeded".to_string(),
        details: None,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    response
}
