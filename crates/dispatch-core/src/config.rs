//! Environment-driven configuration for the process-wide dispatcher
//! singleton, mirroring this workspace's `BytecodeCache::global`/
//! `InterpreterPool::global` convention: a handful of env vars, each with a
//! hard-coded default, parsed once and never surfaced as a fallible path —
//! an absent or unparsable value silently falls back to the default.

use std::time::Duration;

const DEFAULT_WORKER_THREADS: usize = 4;
const DEFAULT_QUEUE_SIZE: usize = 256;
const DEFAULT_FILTER_SIZE: usize = 4096;
const DEFAULT_FILTER_TTL_SECS: u64 = 15;

/// The four construction parameters named by this crate's design notes:
/// `{threads, queue_size, filter_size, filter_ttl}`, all independently
/// legal at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    pub threads: usize,
    pub queue_size: usize,
    pub filter_size: usize,
    pub filter_ttl: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            threads: DEFAULT_WORKER_THREADS,
            queue_size: DEFAULT_QUEUE_SIZE,
            filter_size: DEFAULT_FILTER_SIZE,
            filter_ttl: Duration::from_secs(DEFAULT_FILTER_TTL_SECS),
        }
    }
}

impl DispatchConfig {
    /// Reads `DISPATCH_WORKER_THREADS`, `DISPATCH_QUEUE_SIZE`,
    /// `DISPATCH_FILTER_SIZE`, and `DISPATCH_FILTER_TTL_SECS` from the
    /// environment, falling back field-by-field to [`DispatchConfig::default`]
    /// when a variable is absent or fails to parse.
    pub fn from_env() -> Self {
        let default = DispatchConfig::default();
        DispatchConfig {
            threads: env_usize("DISPATCH_WORKER_THREADS", default.threads),
            queue_size: env_usize("DISPATCH_QUEUE_SIZE", default.queue_size),
            filter_size: env_usize("DISPATCH_FILTER_SIZE", default.filter_size),
            filter_ttl: env_secs("DISPATCH_FILTER_TTL_SECS", default.filter_ttl),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.queue_size, 256);
        assert_eq!(cfg.filter_size, 4096);
        assert_eq!(cfg.filter_ttl, Duration::from_secs(15));
    }

    #[test]
    fn env_usize_falls_back_on_missing_var() {
        assert_eq!(env_usize("DISPATCH_CORE_TEST_NOT_SET_XYZ", 7), 7);
    }

    #[test]
    fn env_usize_falls_back_on_unparsable_var() {
        std::env::set_var("DISPATCH_CORE_TEST_BAD_USIZE", "not-a-number");
        assert_eq!(env_usize("DISPATCH_CORE_TEST_BAD_USIZE", 7), 7);
        std::env::remove_var("DISPATCH_CORE_TEST_BAD_USIZE");
    }

    #[test]
    fn env_usize_parses_valid_var() {
        std::env::set_var("DISPATCH_CORE_TEST_GOOD_USIZE", "42");
        assert_eq!(env_usize("DISPATCH_CORE_TEST_GOOD_USIZE", 7), 42);
        std::env::remove_var("DISPATCH_CORE_TEST_GOOD_USIZE");
    }
}
