use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

use crate::error::ErrorResponse;

/// Throttle for the usage-report route. The oracle retries aggressively on
/// timeouts, so a burst of duplicates is expected traffic; anything past the
/// quota gets a 429 with the standard error envelope and the idempotency
/// layer makes the retry harmless.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>>,
}

impl RateLimitLayer {
    pub fn new(requests: u32, per_seconds: u64) -> Self {
        let quota = Quota::with_period(Duration::from_secs(per_seconds))
            .unwrap()
            .allow_burst(NonZeroU32::new(requests).unwrap());

        RateLimitLayer {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    fn check(&self) -> Result<(), Response> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        let body = Json(ErrorResponse {
            error: "Too many usage reports, slow down and retry".to_string(),
            error_code: "RATE_LIMITED".to_string(),
            details: None,
        });
        Err((StatusCode::TOO_MANY_REQUESTS, body).into_response())
    }
}

pub async fn rate_limit_middleware(
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    let limiter = req
        .extensions()
        .get::<Arc<RateLimitLayer>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(RateLimitLayer::new(100, 60)));

    limiter.check()?;
    Ok(next.run(req).await)
}
