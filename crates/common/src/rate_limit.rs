//! Outbound request rate limiting using token bucket algorithm

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter shared by every request to one remote service
pub type RequestLimiter = DefaultDirectRateLimiter;

/// Create a new rate limiter.
///
/// Zero values are raised to one so a misconfiguration cannot stall every request.
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<RequestLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(rate).allow_burst(burst);

    Arc::new(RateLimiter::direct(quota))
}

/// Wait until the limiter grants a request slot
pub async fn acquire(limiter: &RequestLimiter) {
    if limiter.check().is_err() {
        tracing::debug!("Rate limit reached, waiting for a request slot");
        limiter.until_ready().await;
    }
}
