//! Configuration Module
//!
//! Handles loading memoization settings from environment variables.

use std::env;

/// Memoization and demo parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TTL in seconds for cached results, None = never expires
    pub ttl: Option<u64>,
    /// LRU bound on resident entries, None = no LRU overlay
    pub max_entries: Option<usize>,
    /// Background purge interval in seconds
    pub purge_interval: u64,
    /// Delay of the demo echo function in milliseconds
    pub echo_delay_ms: u64,
    /// Number of sequential demo calls
    pub calls: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DOGPILE_TTL` - TTL in seconds, 0 = never expires (default: 5)
    /// - `DOGPILE_MAXSIZE` - LRU bound, 0 = unbounded (default: 128)
    /// - `DOGPILE_PURGE_INTERVAL` - Purge frequency in seconds (default: 1)
    /// - `DOGPILE_ECHO_DELAY_MS` - Demo echo delay (default: 2000)
    /// - `DOGPILE_CALLS` - Demo call count (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ttl: match read_var("DOGPILE_TTL") {
                Some(0) => None,
                Some(seconds) => Some(seconds),
                None => defaults.ttl,
            },
            max_entries: match read_var("DOGPILE_MAXSIZE") {
                Some(0) => None,
                Some(maxsize) => Some(maxsize),
                None => defaults.max_entries,
            },
            purge_interval: read_var("DOGPILE_PURGE_INTERVAL").unwrap_or(defaults.purge_interval),
            echo_delay_ms: read_var("DOGPILE_ECHO_DELAY_MS").unwrap_or(defaults.echo_delay_ms),
            calls: read_var("DOGPILE_CALLS").unwrap_or(defaults.calls),
        }
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: Some(5),
            max_entries: Some(128),
            purge_interval: 1,
            echo_delay_ms: 2000,
            calls: 10,
        }
    }
}
