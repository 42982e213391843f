use std::{collections::VecDeque, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

// ============== Sliding Window ==============

const MAX_BACKOFF_SHIFT: usize = 16;

/// Timestamps of admitted calls within the trailing window.
#[derive(Clone, Debug)]
pub struct SlidingWindow {
    enabled: bool,
    max_requests: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(enabled: bool, max_requests: u32, window: Duration) -> Self {
        Self {
            enabled,
            max_requests: (max_requests as usize).max(1),
            window,
            stamps: VecDeque::new(),
        }
    }

    /// Try to admit a call at `now`.
    ///
    /// On success the admission is recorded. On rejection, returns the backoff
    /// the caller should sleep before asking again.
    pub fn check_at(&mut self, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }

        self.expire(now);

        if self.stamps.len() >= self.max_requests {
            let excess = self.stamps.len() - self.max_requests;
            return (false, Some(self.backoff(excess)));
        }

        self.stamps.push_back(now);
        (true, None)
    }

    /// Number of admissions still inside the window at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.stamps.len()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&front) = self.stamps.front() {
            if now.saturating_duration_since(front) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// `window * 2^excess`: one full window for the first overrun.
    fn backoff(&self, excess: usize) -> Duration {
        let factor = 1u32 << excess.min(MAX_BACKOFF_SHIFT);
        self.window.saturating_mul(factor)
    }
}

// ============== Shared Limiter ==============

/// Process-wide admission gate for calls to the content API.
///
/// All sessions share one instance; fairness between users is not attempted.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<SlidingWindow>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Mutex::new(SlidingWindow::new(enabled, max_requests, window)),
        }
    }

    /// Suspend until a slot is free, then record the admission.
    pub async fn admit(&self) {
        let mut attempts = 0u32;
        loop {
            let wait = {
                let mut window = self.inner.lock().await;
                match window.check_at(Instant::now()) {
                    (true, _) => return,
                    (false, wait) => wait.unwrap_or(window.window),
                }
            };

            attempts += 1;
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                attempts,
                "rate limit reached, backing off"
            );
            sleep(wait).await;
        }
    }

    pub async fn in_window(&self) -> usize {
        self.inner.lock().await.in_window(Instant::now())
    }
}
