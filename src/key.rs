//! Cache Key Module
//!
//! Derives canonical cache keys from a callee identity and its call arguments.

use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

// == Cache Key ==
/// Canonical, hashable key for one memoized call.
///
/// Two keys compare equal only when both the callee identity and the
/// canonical argument text match, so distinct functions never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    callee: Arc<str>,
    args: String,
}

impl CacheKey {
    /// Fully qualified identity of the function this key belongs to.
    pub fn callee(&self) -> &str {
        &self.callee
    }

    /// Canonical JSON text of `[positional, keyword]`, or its SHA-256 hex
    /// digest when the builder hashes keys.
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.callee, self.args)
    }
}

// == Key Builder ==
/// Builds [`CacheKey`]s for a single callee.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    callee: Arc<str>,
    hashed: bool,
}

impl KeyBuilder {
    /// Creates a builder qualified by `callee` that keeps argument text verbatim.
    pub fn new(callee: impl Into<Arc<str>>) -> Self {
        Self {
            callee: callee.into(),
            hashed: false,
        }
    }

    /// Creates a builder qualified by the type identity of `F`.
    ///
    /// See [`callee_identity`].
    pub fn for_fn<F: 'static>(_function: &F) -> Self {
        Self::new(callee_identity::<F>())
    }

    /// Replaces the argument text of every key with a fixed-size digest.
    pub fn hashed(mut self, hashed: bool) -> Self {
        self.hashed = hashed;
        self
    }

    pub fn callee(&self) -> &str {
        &self.callee
    }

    pub fn is_hashed(&self) -> bool {
        self.hashed
    }

    // == Key ==
    /// Derives a key from explicit positional and keyword arguments.
    ///
    /// Positional order matters. Keyword arguments are compared by name, so the
    /// order they were supplied in is irrelevant.
    pub fn key<P, K>(&self, positional: &[P], keyword: &[(&str, K)]) -> Result<CacheKey>
    where
        P: Serialize,
        K: Serialize,
    {
        let positional = positional
            .iter()
            .map(canonical)
            .collect::<Result<Vec<_>>>()?;

        let mut named = Map::new();
        for (name, value) in keyword {
            named.insert((*name).to_string(), canonical(value)?);
        }

        self.assemble(positional, named)
    }

    // == From Args ==
    /// Derives a key from a single argument value.
    ///
    /// Tuples and sequences count as positional arguments, structs and maps
    /// as keyword arguments, and anything else as one positional argument.
    pub fn from_args<A: Serialize + ?Sized>(&self, args: &A) -> Result<CacheKey> {
        match canonical(args)? {
            Value::Array(positional) => self.assemble(positional, Map::new()),
            Value::Object(named) => self.assemble(Vec::new(), named),
            Value::Null => self.assemble(Vec::new(), Map::new()),
            single => self.assemble(vec![single], Map::new()),
        }
    }

    fn assemble(&self, positional: Vec<Value>, keyword: Map<String, Value>) -> Result<CacheKey> {
        // serde_json's default Map is ordered by key.
        let mut args = serde_json::to_string(&(positional, keyword))
            .map_err(|err| CacheError::InvalidKey(err.to_string()))?;
        if self.hashed {
            args = hex::encode(Sha256::digest(args.as_bytes()));
        }

        Ok(CacheKey {
            callee: Arc::clone(&self.callee),
            args,
        })
    }
}

/// Default callee identity for the function type `F`.
///
/// Function items are named by their full path (`my_crate::module::func`).
/// Every closure in one function shares the path `...::{{closure}}`, so
/// closures are further qualified by a hash of their `TypeId`, which is
/// stable for one build of the program.
pub fn callee_identity<F: 'static>() -> String {
    let name = type_name::<F>();
    if !name.contains("{{closure}}") {
        return name.to_string();
    }

    let mut hasher = DefaultHasher::new();
    TypeId::of::<F>().hash(&mut hasher);
    format!("{name}#{:016x}", hasher.finish())
}

fn canonical<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| CacheError::InvalidKey(err.to_string()))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::{HashMap, HashSet};

    fn first(x: u32) -> u32 {
        x
    }

    fn second(x: u32) -> u32 {
        x
    }

    #[derive(Serialize)]
    struct Named {
        b: u32,
        a: &'static str,
    }

    #[test]
    fn test_same_call_same_key() {
        let keys = KeyBuilder::new("echo");
        assert_eq!(
            keys.from_args(&(1, "x")).unwrap(),
            keys.from_args(&(1, "x")).unwrap()
        );
    }

    #[test]
    fn test_positional_order_matters() {
        let keys = KeyBuilder::new("echo");
        assert_ne!(
            keys.key(&[1, 2], &[] as &[(&str, u8)]).unwrap(),
            keys.key(&[2, 1], &[] as &[(&str, u8)]).unwrap()
        );
    }

    #[test]
    fn test_keyword_order_irrelevant() {
        let keys = KeyBuilder::new("echo");
        let one = keys.key(&[0u8], &[("a", 1), ("b", 2)]).unwrap();
        let two = keys.key(&[0u8], &[("b", 2), ("a", 1)]).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_struct_args_are_keywords() {
        let keys = KeyBuilder::new("echo");
        let from_struct = keys.from_args(&Named { b: 2, a: "x" }).unwrap();
        let explicit = keys
            .key(&[] as &[u8], &[("a", Value::from("x")), ("b", Value::from(2))])
            .unwrap();
        assert_eq!(from_struct, explicit);
    }

    #[test]
    fn test_scalar_is_single_positional() {
        let keys = KeyBuilder::new("echo");
        assert_eq!(
            keys.from_args(&5).unwrap(),
            keys.from_args(&(5,)).unwrap()
        );
    }

    #[test]
    fn test_distinct_callees_never_collide() {
        let a = KeyBuilder::for_fn(&first);
        let b = KeyBuilder::for_fn(&second);
        assert_ne!(a.callee(), b.callee());
        assert!(a.callee().ends_with("first"));

        let mut seen = HashSet::new();
        seen.insert(a.from_args(&3).unwrap());
        seen.insert(b.from_args(&3).unwrap());
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_closures_in_one_function_are_distinct() {
        let plus_one = |n: u32| n + 1;
        let times_ten = |n: u32| n * 10;

        let a = KeyBuilder::for_fn(&plus_one);
        let b = KeyBuilder::for_fn(&times_ten);

        assert_ne!(a.callee(), b.callee());
        assert!(a.callee().contains("{{closure}}#"));
        assert_ne!(a.from_args(&3).unwrap(), b.from_args(&3).unwrap());
        assert_eq!(a.callee(), KeyBuilder::for_fn(&plus_one).callee());
    }

    #[test]
    fn test_hashed_args_have_fixed_size() {
        let keys = KeyBuilder::new("echo").hashed(true);
        let short = keys.from_args(&1).unwrap();
        let long = keys.from_args(&"x".repeat(10_000)).unwrap();

        assert!(keys.is_hashed());
        assert_eq!(short.args().len(), 64);
        assert_eq!(long.args().len(), 64);
        assert_ne!(short, long);
        assert_eq!(short, keys.from_args(&(1,)).unwrap());
    }

    #[test]
    fn test_hashing_keeps_keyword_order_irrelevant() {
        let keys = KeyBuilder::new("echo").hashed(true);
        let one = keys.key(&[0u8], &[("a", 1), ("b", 2)]).unwrap();
        let two = keys.key(&[0u8], &[("b", 2), ("a", 1)]).unwrap();
        assert_eq!(one, two);
        assert_ne!(one, KeyBuilder::new("echo").key(&[0u8], &[("a", 1), ("b", 2)]).unwrap());
    }

    #[test]
    fn test_unhashable_argument_is_rejected() {
        let keys = KeyBuilder::new("echo");
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        let result = keys.from_args(&bad);
        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
    }
}
