//! Submission rate limiting
//!
//! Throttles how many tasks are handed to workers per second, measured over
//! a sliding one-second window. This bounds load on very large trees; it
//! does not throttle the attribute I/O itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Length of the sliding window
const WINDOW: Duration = Duration::from_secs(1);

/// Longest single sleep, so interrupts are noticed promptly
const MAX_NAP: Duration = Duration::from_millis(50);

/// Sliding-window limiter on task submissions
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u64,
    window: Duration,
    admitted: VecDeque<(Instant, u64)>,
    in_window: u64,
}

impl RateLimiter {
    /// Limiter allowing `max_per_second` submissions per second
    pub fn per_second(max_per_second: u32) -> Self {
        Self::new(u64::from(max_per_second.max(1)), WINDOW)
    }

    pub fn new(max_per_window: u64, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            admitted: VecDeque::new(),
            in_window: 0,
        }
    }

    /// Largest batch that can ever be admitted at once
    pub fn max_batch(&self) -> usize {
        usize::try_from(self.max_per_window).unwrap_or(usize::MAX)
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, n)) = self.admitted.front() {
            if now.duration_since(at) >= self.window {
                self.admitted.pop_front();
                self.in_window -= n;
            } else {
                break;
            }
        }
    }

    /// Admit `n` submissions now if the window has room
    pub fn try_acquire(&mut self, n: u64) -> bool {
        self.try_acquire_at(n, Instant::now())
    }

    fn try_acquire_at(&mut self, n: u64, now: Instant) -> bool {
        self.expire(now);
        // An oversized batch is admitted alone into an empty window
        if self.in_window + n <= self.max_per_window || self.in_window == 0 {
            self.admitted.push_back((now, n));
            self.in_window += n;
            true
        } else {
            false
        }
    }

    /// Time until the oldest admission leaves the window
    fn wait_hint(&self, now: Instant) -> Duration {
        self.admitted
            .front()
            .map(|&(at, _)| self.window.saturating_sub(now.duration_since(at)))
            .unwrap_or_default()
    }

    /// Block until `n` submissions fit in the window.
    ///
    /// Returns false without admitting anything if `stop` is raised while
    /// waiting.
    pub fn acquire(&mut self, n: u64, stop: &AtomicBool) -> bool {
        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if self.try_acquire_at(n, now) {
                return true;
            }
            let nap = self.wait_hint(now).clamp(Duration::from_millis(1), MAX_NAP);
            thread::sleep(nap);
        }
    }
}

/// Acquire from an optional limiter; a missing limiter always admits
pub(crate) fn admit(limiter: &mut Option<RateLimiter>, n: usize, stop: &AtomicBool) -> bool {
    match limiter {
        Some(limiter) => limiter.acquire(n as u64, stop),
        None => !stop.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_capacity() {
        let mut limiter = RateLimiter::new(10, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.try_acquire_at(6, now));
        assert!(limiter.try_acquire_at(4, now));
        assert!(!limiter.try_acquire_at(1, now));
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(5, Duration::from_millis(100));
        let start = Instant::now();
        assert!(limiter.try_acquire_at(5, start));
        assert!(!limiter.try_acquire_at(1, start + Duration::from_millis(50)));
        assert!(limiter.try_acquire_at(5, start + Duration::from_millis(100)));
    }

    #[test]
    fn test_oversized_batch_admitted_alone() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.try_acquire_at(10, now));
        assert!(!limiter.try_acquire_at(1, now));
    }

    #[test]
    fn test_acquire_throttles() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(100));
        let stop = AtomicBool::new(false);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.acquire(2, &stop));
        }
        // Three full windows need at least two window lengths of waiting
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_acquire_respects_stop() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let stop = AtomicBool::new(false);
        assert!(limiter.acquire(1, &stop));
        stop.store(true, Ordering::SeqCst);
        assert!(!limiter.acquire(1, &stop));
    }
}
