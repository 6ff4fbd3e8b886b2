use governor::{DefaultDirectRateLimiter, Quota};
use std::{num::NonZeroU32, time::Duration};

// No two requests closer than this, even when the per-second budget allows a burst.
const MS_BETWEEN_REQ: Duration = Duration::from_millis(50);

/// Keeps the poller and every reservation worker polite towards the portal.
///
/// Shared by all users of one [`crate::session::Session`], so the budget is
/// global to the process rather than per task.
pub struct RateLimiter {
    req_per_sec: DefaultDirectRateLimiter,
    ms_between_req: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    pub fn new(req_per_sec: NonZeroU32) -> Self {
        // Limit to X total req/sec on average.
        let req_per_sec = DefaultDirectRateLimiter::direct(Quota::per_second(req_per_sec));

        // Limit to Y req/ms (i.e. no two requests closer than Y ms).
        let ms_between_req = Quota::with_period(MS_BETWEEN_REQ).map(DefaultDirectRateLimiter::direct);

        RateLimiter {
            req_per_sec,
            ms_between_req,
        }
    }

    pub async fn wait_until_ready(&self) {
        // We won't call this more than X times per sec.
        self.req_per_sec.until_ready().await;
        // Y ms have passed since the last time we called this.
        if let Some(limiter) = &self.ms_between_req {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
