//! Fixed minimum inter-arrival gate

use std::time::{Duration, Instant};

/// Default gate: caps accepted frames near 6-7 per second.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(150);

/// Accepts a frame only if enough time has passed since the last accepted one.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// Returns true and records `now` iff `now - last_accepted >= min_interval`.
    /// The first call always accepts. Rejections record nothing.
    pub fn accept(&mut self, now: Instant) -> bool {
        let open = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        };
        if open {
            self.last_accepted = Some(now);
        }
        open
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn first_frame_is_always_accepted() {
        let mut limiter = RateLimiter::default();
        assert!(limiter.accept(Instant::now()));
    }

    #[test]
    fn gate_is_inclusive_at_the_interval() {
        let base = Instant::now();
        let mut limiter = RateLimiter::default();

        assert!(limiter.accept(ms(base, 0)));
        assert!(!limiter.accept(ms(base, 149)));
        assert!(limiter.accept(ms(base, 150)));
        assert!(!limiter.accept(ms(base, 299)));
        assert!(limiter.accept(ms(base, 300)));
    }

    #[test]
    fn rejection_does_not_move_the_reference_point() {
        let base = Instant::now();
        let mut limiter = RateLimiter::default();

        assert!(limiter.accept(ms(base, 0)));
        for offset in (10..150).step_by(10) {
            assert!(!limiter.accept(ms(base, offset)));
        }
        assert_eq!(limiter.last_accepted(), Some(base));
        assert!(limiter.accept(ms(base, 150)));
    }

    #[test]
    fn accepted_timestamps_are_never_closer_than_the_interval() {
        // Deterministic jittered arrivals: 7..=47ms apart.
        let base = Instant::now();
        let mut limiter = RateLimiter::default();
        let mut now = 0u64;
        let mut seed = 0x2545_f491u32;
        let mut accepted = Vec::new();
        let mut expected_last: Option<u64> = None;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            now += 7 + u64::from(seed % 41);

            let should = expected_last.map_or(true, |last| now - last >= 150);
            assert_eq!(limiter.accept(ms(base, now)), should, "at {now}ms");
            if should {
                expected_last = Some(now);
                accepted.push(now);
            }
        }

        assert!(accepted.windows(2).all(|pair| pair[1] - pair[0] >= 150));
    }

    #[test]
    fn earlier_timestamp_than_last_is_rejected() {
        let base = Instant::now();
        let mut limiter = RateLimiter::default();
        assert!(limiter.accept(ms(base, 500)));
        assert!(!limiter.accept(ms(base, 100)));
    }
}
