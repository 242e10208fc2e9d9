//! Sliding-window rate limiter
//!
//! One limiter is bound to exactly one source. Callers wait on a fair async
//! mutex, so admission order matches call order.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// At most `max_calls` calls per rolling window
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limit to `max_calls` per rolling minute
    pub fn per_minute(max_calls: u32) -> Self {
        Self::with_window(max_calls, DEFAULT_WINDOW)
    }

    pub fn with_window(max_calls: u32, window: Duration) -> Self {
        let max_calls = max_calls.max(1) as usize;
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call is allowed, record it, and return the time spent waiting
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        let mut calls = self.calls.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = calls.front() {
                if now.duration_since(oldest) >= self.window {
                    calls.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match calls.front() {
                Some(&oldest) if calls.len() >= self.max_calls => oldest,
                _ => {
                    calls.push_back(now);
                    return now.duration_since(start);
                }
            };

            let wait = self.window.saturating_sub(now.duration_since(oldest));
            info!("Rate limit reached, waiting {:.1} seconds", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls currently inside the window
    pub async fn in_window(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}
