//! Value Envelope Module
//!
//! Bundles a stored value with the parameters used to validate it later.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::Params;

// == Value Envelope ==
/// A payload plus its verification parameters, as persisted by a backend.
///
/// The byte layout is private to the storage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEnvelope<V> {
    pub payload: V,
    #[serde(default)]
    pub params: Params,
}

impl<V> ValueEnvelope<V>
where
    V: Serialize + DeserializeOwned,
{
    // == Pack ==
    /// Encodes `value` and `params` into an opaque blob.
    pub fn pack(value: &V, params: &Params) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Borrowed<'a, V> {
            payload: &'a V,
            params: &'a Params,
        }

        Ok(serde_json::to_vec(&Borrowed {
            payload: value,
            params,
        })?)
    }

    // == Unpack ==
    /// Decodes a blob produced by [`ValueEnvelope::pack`].
    pub fn unpack(blob: &[u8]) -> Result<(V, Params)> {
        let envelope: ValueEnvelope<V> = serde_json::from_slice(blob)?;
        Ok((envelope.payload, envelope.params))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde_json::json;

    #[test]
    fn test_pack_unpack_with_params() {
        let mut params = Params::new();
        params.insert("ttl".to_string(), json!(1_700_000_000_000u64));
        params.insert("tag".to_string(), json!("blue"));

        let blob = ValueEnvelope::pack(&vec![1u8, 2, 3], &params).unwrap();
        let (value, restored) = ValueEnvelope::<Vec<u8>>::unpack(&blob).unwrap();

        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(restored, params);
    }

    #[test]
    fn test_unpack_without_params_field() {
        let (value, params) = ValueEnvelope::<String>::unpack(br#"{"payload":"x"}"#).unwrap();
        assert_eq!(value, "x");
        assert!(params.is_empty());
    }

    #[test]
    fn test_unpack_garbage_is_codec_error() {
        let result = ValueEnvelope::<String>::unpack(b"not an envelope");
        assert!(matches!(result, Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_unpack_wrong_payload_type() {
        let blob = ValueEnvelope::pack(&"text".to_string(), &Params::new()).unwrap();
        assert!(ValueEnvelope::<u64>::unpack(&blob).is_err());
    }
}
