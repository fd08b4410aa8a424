use chrono::{DateTime, Utc};

/// Global send-rate limiter. Refills continuously at `rate_per_s` up to a
/// burst of one second's worth of tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_s: f64,
    last_refill: Option<DateTime<Utc>>,
}

impl TokenBucket {
    pub fn new(rate_per_s: u32) -> Self {
        let capacity = rate_per_s.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_s: capacity,
            last_refill: None,
        }
    }

    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_refill {
            let elapsed = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
            self.tokens = (self.tokens + elapsed * self.refill_per_s).min(self.capacity);
        }
        self.last_refill = Some(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn burst_is_capped_at_one_second_of_tokens() {
        let mut bucket = TokenBucket::new(3);
        let t0 = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        assert!(bucket.try_acquire(t0));
        assert!(bucket.try_acquire(t0));
        assert!(bucket.try_acquire(t0));
        assert!(!bucket.try_acquire(t0));
    }

    #[test]
    fn tokens_refill_with_elapsed_time() {
        let mut bucket = TokenBucket::new(2);
        let t0 = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        assert!(bucket.try_acquire(t0));
        assert!(bucket.try_acquire(t0));
        assert!(!bucket.try_acquire(t0));

        // Half a second restores one token at 2/s.
        let t1 = t0 + chrono::Duration::milliseconds(500);
        assert!(bucket.try_acquire(t1));
        assert!(!bucket.try_acquire(t1));

        // A long idle period still caps at capacity.
        let t2 = t1 + chrono::Duration::seconds(60);
        assert!(bucket.try_acquire(t2));
        assert!(bucket.try_acquire(t2));
        assert!(!bucket.try_acquire(t2));
    }
}
