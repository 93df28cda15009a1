//! # Value Serialization
//!
//! The session hands values to the engine as opaque bytes plus a flag set.
//! How values become bytes is owned by a [`Serializer`]; the flags are carried
//! alongside the bytes through every API untouched.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit flags travelling with an encoded value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueFlags(u32);

impl ValueFlags {
    pub const NONE: ValueFlags = ValueFlags(0);
    pub const JSON: ValueFlags = ValueFlags(1);
    pub const BINARY: ValueFlags = ValueFlags(1 << 1);
    pub const COMPRESSED: ValueFlags = ValueFlags(1 << 2);
    pub const LOCKED_ITEM: ValueFlags = ValueFlags(1 << 3);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ValueFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: ValueFlags) {
        self.0 |= other.0;
    }

    pub fn unset(&mut self, other: ValueFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for ValueFlags {
    type Output = ValueFlags;

    fn bitor(self, rhs: ValueFlags) -> ValueFlags {
        ValueFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValueFlags {
    fn bitor_assign(&mut self, rhs: ValueFlags) {
        self.0 |= rhs.0;
    }
}

/// Serialized value as stored by the engine
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub flags: ValueFlags,
}

impl EncodedValue {
    pub fn new(bytes: Vec<u8>, flags: ValueFlags) -> Self {
        Self { bytes, flags }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedValue")
            .field("len", &self.bytes.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Converts application values to and from their encoded form
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<EncodedValue>;

    fn deserialize(&self, encoded: &EncodedValue) -> Result<serde_json::Value>;
}

/// Default serializer storing values as JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<EncodedValue> {
        Ok(EncodedValue::new(serde_json::to_vec(value)?, ValueFlags::JSON))
    }

    fn deserialize(&self, encoded: &EncodedValue) -> Result<serde_json::Value> {
        if encoded.flags.contains(ValueFlags::COMPRESSED) {
            return Err(CacheError::Serialization(
                "compressed payloads are not supported by JsonSerializer".to_string(),
            ));
        }
        Ok(serde_json::from_slice(&encoded.bytes)?)
    }
}

/// Serialize a typed value through `serializer`
pub fn encode<T: Serialize>(serializer: &dyn Serializer, value: &T) -> Result<EncodedValue> {
    let json = serde_json::to_value(value)?;
    serializer.serialize(&json)
}

/// Deserialize a typed value through `serializer`
pub fn decode<T: serde::de::DeserializeOwned>(
    serializer: &dyn Serializer,
    encoded: &EncodedValue,
) -> Result<T> {
    let json = serializer.deserialize(encoded)?;
    Ok(serde_json::from_value(json)?)
}
