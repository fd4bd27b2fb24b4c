//! JSON decoding for recorded trees.
//!
//! Serialized DOM trees nest two JSON levels per node, so real pages easily
//! pass serde_json's default depth limit of 128. These helpers lift the limit
//! and grow the stack on demand instead.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Decode `raw` without a nesting limit. Trailing data is an error.
pub fn from_slice<T: DeserializeOwned>(raw: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(raw);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Decode an already-parsed value, growing the stack for deep trees.
pub fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<T> {
    T::deserialize(serde_stacker::Deserializer::new(value))
}
