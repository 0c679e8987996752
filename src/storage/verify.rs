//! Verification Module
//!
//! Named verifiers decide whether a stored parameter still sanctions using the
//! cached value. Each backend owns a registry populated at construction time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::storage::{Params, TTL_PARAM};

// == Verifier ==
/// Write-time preparation and read-time check for one named parameter.
pub trait Verifier: Send + Sync {
    /// Turns the value supplied to `set` into the value that gets stored.
    ///
    /// Returning `None` omits the parameter from the envelope.
    fn prepare(&self, supplied: &Value) -> Result<Option<Value>> {
        Ok(Some(supplied.clone()))
    }

    /// Returns true while the stored value is still valid.
    fn verify(&self, stored: &Value) -> bool;
}

// == TTL Verifier ==
/// Expires entries a number of seconds after they were written.
///
/// `set` receives the TTL in seconds (integer or fractional) and stores the
/// absolute expiry as Unix milliseconds. `null` means "never expires".
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlVerifier;

impl Verifier for TtlVerifier {
    fn prepare(&self, supplied: &Value) -> Result<Option<Value>> {
        if supplied.is_null() {
            return Ok(None);
        }

        let seconds = supplied
            .as_f64()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .ok_or_else(|| {
                CacheError::Configuration(format!("ttl must be a non-negative number, got {supplied}"))
            })?;

        // The float cast saturates; huge TTLs clamp to the far future.
        let ttl_ms = (seconds * 1000.0).round() as i64;
        let expires_at = current_timestamp_ms().saturating_add(ttl_ms);
        Ok(Some(Value::from(expires_at)))
    }

    fn verify(&self, stored: &Value) -> bool {
        match stored.as_i64() {
            Some(expires_at) => expires_at > current_timestamp_ms(),
            None => false,
        }
    }
}

// == Verifier Registry ==
/// Maps parameter names to their verifiers.
#[derive(Clone, Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn Verifier>>,
}

impl VerifierRegistry {
    /// Creates an empty registry; every envelope is then valid only if it
    /// carries no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the [`TtlVerifier`] registered under `ttl`.
    pub fn with_ttl() -> Self {
        let mut registry = Self::new();
        registry.register(TTL_PARAM, TtlVerifier);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, verifier: impl Verifier + 'static) {
        self.verifiers.insert(name.into(), Arc::new(verifier));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.verifiers.contains_key(name)
    }

    // == Prepare ==
    /// Runs every verifier's write-time preparation over `params`.
    pub fn prepare(&self, params: Params) -> Result<Params> {
        let mut stored = Params::new();
        for (name, supplied) in params {
            let verifier = self.lookup(&name)?;
            if let Some(value) = verifier.prepare(&supplied)? {
                stored.insert(name, value);
            }
        }
        Ok(stored)
    }

    // == Check ==
    /// Returns true when every stored parameter passes its verifier.
    ///
    /// A parameter with no registered verifier is a configuration defect.
    pub fn check(&self, params: &Params) -> Result<bool> {
        for (name, stored) in params {
            if !self.lookup(name)?.verify(stored) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Verifier>> {
        self.verifiers
            .get(name)
            .ok_or_else(|| CacheError::Verification(name.to_string()))
    }
}

impl fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.verifiers.keys().collect();
        names.sort();
        f.debug_struct("VerifierRegistry")
            .field("params", &names)
            .finish()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
