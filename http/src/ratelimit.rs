//! Per-client sliding-window rate limiting, following the re-architecture note of modeling
//! explicit bookkeeping as a keyed map rather than reaching for ambient middleware state.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Requests allowed per window.
pub const LIMIT: usize = 10;
/// Window length.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Tracks recent request timestamps per client key (typically the `from` address).
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request attempt for `key`. Returns `Ok(())` if under the limit, or
    /// `Err(retry_after_secs)` if the client must wait.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_owned()).or_default();
        entry.retain(|t| now.duration_since(*t) < WINDOW);

        if entry.len() >= LIMIT {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = WINDOW.saturating_sub(now.duration_since(oldest)).as_secs().max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..LIMIT {
            assert!(limiter.check("0xabc").is_ok());
        }
        assert!(limiter.check("0xabc").is_err());
    }

    #[test]
    fn separate_keys_have_separate_windows() {
        let limiter = RateLimiter::new();
        for _ in 0..LIMIT {
            limiter.check("0xone").unwrap();
        }
        assert!(limiter.check("0xtwo").is_ok());
    }
}
