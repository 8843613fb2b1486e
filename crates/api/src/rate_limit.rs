use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Number of tracked clients at which idle entries are swept.
const SWEEP_THRESHOLD: usize = 1024;

/// Sliding-window limiter keyed by client address. Keys whose window has
/// fully drained are dropped so the map only holds recently active clients.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    /// Records a hit for `key`, or returns how long until the oldest hit in
    /// the window expires.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.lock().len()
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut guard = self.inner.lock();
        if guard.len() >= SWEEP_THRESHOLD && !guard.contains_key(key) {
            let window = self.window;
            guard.retain(|_, queue| {
                prune(queue, now, window);
                !queue.is_empty()
            });
        }

        let queue = guard.entry(key.to_string()).or_default();
        prune(queue, now, self.window);

        if queue.len() >= self.max_requests {
            let retry_after = queue
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            if queue.is_empty() {
                guard.remove(key);
            }
            return Err(retry_after);
        }

        queue.push_back(now);
        Ok(())
    }
}

fn prune(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
