use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter gating every outbound oracle call. Capacity equals
/// the configured requests-per-second, so a full bucket allows at most one
/// second's worth of burst.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rps = if requests_per_second > 0.0 {
            requests_per_second
        } else {
            2.0
        };
        RateLimiter {
            capacity: rps.max(1.0),
            refill_per_sec: rps,
            state: Mutex::new(BucketState {
                tokens: rps.max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Number of calls that may be in flight before the bucket throttles;
    /// used to size the dispatcher's worker pool.
    pub fn burst_capacity(&self) -> usize {
        (self.capacity.ceil() as usize).max(1)
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();

        // Two tokens of burst are free; the next three each wait ~0.5 s.
        for _ in 0..5 {
            limiter.acquire().await;
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1400), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1700), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn window_bound_holds() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();
        let mut in_first_second = 0usize;
        for _ in 0..8 {
            limiter.acquire().await;
            if start.elapsed() <= Duration::from_secs(1) {
                in_first_second += 1;
            }
        }
        // RPS + bucket allowance: never more than capacity + rps in a window.
        assert!(in_first_second <= 4, "{in_first_second} calls in first second");
    }

    #[test]
    fn non_positive_rate_falls_back() {
        let limiter = RateLimiter::new(0.0);
        assert_eq!(limiter.burst_capacity(), 2);
    }
}
