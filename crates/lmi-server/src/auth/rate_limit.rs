//! Sliding-window limiter for login and refresh attempts.
//!
//! Each client address keeps the timestamps of its recent attempts; an
//! attempt is refused once the window already holds `max_attempts`.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct AttemptLimiter {
    /// 0 disables limiting.
    max_attempts: u32,
    window: Duration,
    entries: HashMap<IpAddr, VecDeque<Instant>>,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: HashMap::new(),
        }
    }

    /// Limiter allowing `max_attempts` per minute.
    pub fn per_minute(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_secs(60))
    }

    /// Record an attempt from `ip` if allowed. Returns `false` when limited.
    pub fn check_and_record(&mut self, ip: IpAddr) -> bool {
        self.check_and_record_at(ip, Instant::now())
    }

    fn check_and_record_at(&mut self, ip: IpAddr, now: Instant) -> bool {
        if self.max_attempts == 0 {
            return true;
        }
        let window = self.window;
        let attempts = self.entries.entry(ip).or_default();
        while attempts
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            attempts.pop_front();
        }
        if attempts.len() as u32 >= self.max_attempts {
            return false;
        }
        attempts.push_back(now);
        true
    }

    /// Drop addresses with no attempts left in the window.
    pub fn gc(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < window);
            !attempts.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn limits_per_address() {
        let mut limiter = AttemptLimiter::per_minute(2);
        assert!(limiter.check_and_record(A));
        assert!(limiter.check_and_record(A));
        assert!(!limiter.check_and_record(A));
        assert!(limiter.check_and_record(B));
    }

    #[test]
    fn window_slides() {
        let mut limiter = AttemptLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_and_record_at(A, start));
        assert!(!limiter.check_and_record_at(A, start + Duration::from_secs(9)));
        assert!(limiter.check_and_record_at(A, start + Duration::from_secs(10)));
    }

    #[test]
    fn zero_disables() {
        let mut limiter = AttemptLimiter::per_minute(0);
        for _ in 0..100 {
            assert!(limiter.check_and_record(A));
        }
    }

    #[test]
    fn gc_drops_idle_addresses() {
        let mut limiter = AttemptLimiter::new(5, Duration::from_millis(1));
        limiter.check_and_record(A);
        std::thread::sleep(Duration::from_millis(5));
        limiter.gc();
        assert_eq!(limiter.tracked(), 0);
    }
}
