// Tumbling one-second ingest rate limiter

use parking_lot::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Counts ingest calls in one-second tumbling windows.
///
/// Error and fatal entries bypass this entirely; the engine never consults
/// the limiter for priority entries.
pub struct RateLimiter {
    max_per_second: u32,
    window: Mutex<Window>,
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        RateLimiter {
            max_per_second,
            window: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Record one ingest attempt; true means the entry should be dropped.
    /// A limit of 0 disables limiting.
    pub fn should_limit(&self) -> bool {
        if self.max_per_second == 0 {
            return false;
        }

        let mut window = self.window.lock();
        let now = Instant::now();
        if now.duration_since(window.started_at) >= WINDOW {
            window.started_at = now;
            window.count = 1;
            return false;
        }

        window.count += 1;
        window.count > self.max_per_second
    }
}
