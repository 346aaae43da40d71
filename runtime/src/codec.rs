// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Canonical encoding
//!
//! The encoding shared by every process of a cluster. The response cache hashes parameters with
//! it, so two processes that receive the same call compute the same key.
//!

use crate::{Error, invocation::Value};

use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

/// Encodes `value`.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: Serialize + ?Sized,
{
    Ok(bincode::serialize(value)?)
}

/// Decodes a value produced by [`encode`].
pub fn decode<T>(bytes: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    Ok(bincode::deserialize(bytes)?)
}

/// Stable hash of an invocation's parameters: the first 8 bytes, big-endian, of the SHA-256
/// digest of their canonical encoding.
pub fn parameter_hash(args: &[Value]) -> Result<u64, Error> {
    let digest = Sha256::digest(encode(args)?);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(prefix))
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::collections::BTreeMap;

    #[test]
    fn test_decode_restores_value() {
        let value = Value::object(
            "Order",
            [
                ("id", Value::Int(7)),
                ("lines", Value::List(vec![Value::from("a"), Value::Bytes(vec![1, 2])])),
            ],
        );
        let bytes = encode(&value).unwrap();
        assert_eq!(decode::<Value>(&bytes).unwrap(), value);
        assert!(matches!(decode::<Value>(&[0xff; 3]), Err(Error::Codec(_))));
    }

    #[test]
    fn test_parameter_hash_is_stable() {
        let args = vec![Value::Int(1), Value::from("x")];
        assert_eq!(parameter_hash(&args), parameter_hash(&args.clone()));
        assert_ne!(
            parameter_hash(&args).unwrap(),
            parameter_hash(&[Value::Int(2), Value::from("x")]).unwrap()
        );

        // Map entries hash the same regardless of insertion order.
        let mut first = BTreeMap::new();
        first.insert("a".to_owned(), Value::Int(1));
        first.insert("b".to_owned(), Value::Int(2));
        let mut second = BTreeMap::new();
        second.insert("b".to_owned(), Value::Int(2));
        second.insert("a".to_owned(), Value::Int(1));
        assert_eq!(
            parameter_hash(&[Value::Map(first)]),
            parameter_hash(&[Value::Map(second)])
        );
    }
}
