//! Token-bucket rate limiter shared by every registry caller.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled at a fixed requests-per-second rate.
///
/// One instance is shared (via `Arc`) across the whole run, so the
/// aggregate request rate stays under the registry's limit no matter how
/// many workers are validating candidates.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rps: u32) -> Self {
        let rate = f64::from(rps.max(1));
        Self {
            rate,
            capacity: rate,
            bucket: Mutex::new(Bucket { tokens: rate, last_refill: Instant::now() }),
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            sleep(wait).await;
        }
    }
}
