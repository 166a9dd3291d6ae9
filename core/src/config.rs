//! Shared configuration primitives: retry policy and the `$VAR` / `${VAR}` expansion helper
//! used by every crate that loads a TOML config file with secrets injected from the
//! environment.

use serde::{Deserialize, Serialize};

/// Governs the failed -> validated retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Transfers with `retryCount >= max_retries` are terminally failed, never re-queued.
    #[serde(default = "RetryPolicy::default_max_retries")]
    pub max_retries: i32,
    /// Backoff is `2^retryCount` seconds, measured from the most recent `failed` event.
    #[serde(default = "RetryPolicy::default_base_backoff_secs")]
    pub base_backoff_secs: u64,
}

impl RetryPolicy {
    const fn default_max_retries() -> i32 {
        3
    }

    const fn default_base_backoff_secs() -> u64 {
        1
    }

    /// The backoff delay for a transfer currently at `retry_count`.
    #[must_use]
    pub fn backoff_for(&self, retry_count: i32) -> std::time::Duration {
        let exponent = retry_count.max(0).min(20) as u32;
        std::time::Duration::from_secs(self.base_backoff_secs.saturating_mul(2u64.saturating_pow(exponent)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_backoff_secs: Self::default_base_backoff_secs(),
        }
    }
}

/// Bounds for the executor's runtime-adjustable concurrency cap.
pub const MIN_CONCURRENCY: usize = 1;
/// See [`MIN_CONCURRENCY`].
pub const MAX_CONCURRENCY: usize = 10;
/// Default concurrency cap at startup.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Expands `$VAR` and `${VAR}` references in `input` using the process environment.
/// An unset variable is left as an empty string, matching the facilitator config loader
/// this is adapted from.
#[must_use]
pub fn expand_env_vars(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            output.push(c);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                output.push_str(&std::env::var(&name).unwrap_or_default());
            }
            Some(&next) if next.is_ascii_alphabetic() || next == '_' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                output.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => output.push('$'),
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_vars() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe {
            std::env::set_var("RELAYER_TEST_VAR", "secret");
        }
        assert_eq!(expand_env_vars("postgres://${RELAYER_TEST_VAR}@host"), "postgres://secret@host");
        assert_eq!(expand_env_vars("$RELAYER_TEST_VAR-suffix"), "secret-suffix");
        unsafe {
            std::env::remove_var("RELAYER_TEST_VAR");
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0).as_secs(), 1);
        assert_eq!(policy.backoff_for(1).as_secs(), 2);
        assert_eq!(policy.backoff_for(3).as_secs(), 8);
    }
}
