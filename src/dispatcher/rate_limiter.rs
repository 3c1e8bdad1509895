use std::sync::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with burst capacity and continuous refill. `acquire` is O(1)
/// and guarded by a mutex; tokens never exceed the burst capacity.
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Result<Self, String> {
        if rate_per_sec <= 0.0 {
            return Err("rate_per_sec must be > 0".to_string());
        }
        if burst <= 0.0 {
            return Err("burst must be > 0".to_string());
        }
        Ok(Self {
            rate_per_sec,
            capacity: burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Refill elapsed * rate (capped at capacity), then take `n` tokens if
    /// available. Acquiring zero or fewer tokens always succeeds and leaves
    /// the bucket unchanged.
    pub fn acquire(&self, n: f64) -> bool {
        if n <= 0.0 {
            return true;
        }
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        self.refill(&mut state);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        self.refill(&mut state);
        state.tokens
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }
    }
}
