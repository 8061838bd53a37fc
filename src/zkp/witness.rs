// src/zkp/witness.rs
//! Witness encoding, version 1.
//!
//! Maps structured inputs onto decimal field elements the backend accepts:
//! - Categorical attributes (`role`, `clearance`, `clearance_level`) go through
//!   a fixed enumeration table; unknown values are rejected
//! - RFC 3339 timestamps become Unix seconds; ISO 8601 timestamps without an
//!   offset are read as UTC
//! - Other strings (ids, DIDs, types) become SHA-256 truncated to 31 bytes,
//!   which always fits below the BN254 scalar modulus
//! - Non-negative integers pass through, booleans become 0/1
//! - Anything else is digested from its canonical JSON
//!
//! Changing any mapping changes every witness and therefore every proof, so a
//! change means a new [`ENCODING_VERSION`].

use crate::error::{Result, TrustError};
use crate::models::credential::{Attributes, VerifiableCredential};
use crate::utils::crypto::sha256;
use crate::utils::serialization::to_canonical_json;
use chrono::{DateTime, NaiveDateTime};
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const ENCODING_VERSION: u32 = 1;

/// Bytes kept from a digest.
pub const FIELD_BYTES: usize = 31;

/// Names of the credential-bound public inputs, in circuit order.
pub const CREDENTIAL_INPUTS: [&str; 4] = ["credential_id", "credential_type", "expiration_date", "issuer"];

/// Categorical attribute → (value → code). Codes start at 1 so zero never
/// stands for a real value.
static CATEGORIES: Lazy<HashMap<&'static str, HashMap<&'static str, u64>>> = Lazy::new(|| {
    let roles: HashMap<_, _> = [
        ("observer", 1),
        ("operator", 2),
        ("analyst", 3),
        ("commander", 4),
        ("administrator", 5),
    ]
    .into_iter()
    .collect();
    let clearances: HashMap<_, _> = [
        ("low", 1),
        ("medium", 2),
        ("high", 3),
        ("secret", 4),
        ("top_secret", 5),
    ]
    .into_iter()
    .collect();

    let mut table = HashMap::new();
    table.insert("role", roles);
    table.insert("clearance", clearances.clone());
    table.insert("clearance_level", clearances);
    table
});

/// First [`FIELD_BYTES`] of SHA-256(`data`) as a decimal integer.
pub fn digest_to_field(data: &[u8]) -> String {
    BigUint::from_bytes_be(&sha256(data)[..FIELD_BYTES]).to_str_radix(10)
}

/// Encodes one named input.
///
/// # Errors
/// `InvalidInput` for unknown categorical values, non-string categorical
/// values and negative integers.
pub fn encode_value(name: &str, value: &Value) -> Result<String> {
    if let Some(codes) = CATEGORIES.get(name) {
        let text = value.as_str().ok_or_else(|| {
            TrustError::InvalidInput(format!("categorical input '{}' must be a string", name))
        })?;
        return codes
            .get(text)
            .map(|code| code.to_string())
            .ok_or_else(|| {
                TrustError::InvalidInput(format!("unknown value '{}' for categorical input '{}'", text, name))
            });
    }

    match value {
        Value::String(text) => match parse_timestamp(text) {
            Some(seconds) if seconds >= 0 => Ok(seconds.to_string()),
            Some(_) => Err(TrustError::InvalidInput(format!("timestamp '{}' predates the epoch", text))),
            None => Ok(digest_to_field(text.as_bytes())),
        },
        Value::Bool(flag) => Ok(if *flag { "1" } else { "0" }.to_string()),
        Value::Number(number) => {
            if let Some(n) = number.as_u64() {
                Ok(n.to_string())
            } else if number.is_i64() {
                Err(TrustError::InvalidInput(format!("input '{}' is negative", name)))
            } else {
                Ok(digest_to_field(to_canonical_json(value)?.as_bytes()))
            }
        }
        other => Ok(digest_to_field(to_canonical_json(other)?.as_bytes())),
    }
}

fn parse_timestamp(text: &str) -> Option<i64> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.timestamp());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Encodes every input in key order.
pub fn encode_inputs(inputs: &Attributes) -> Result<Vec<String>> {
    inputs
        .iter()
        .map(|(name, value)| encode_value(name, value))
        .collect()
}

/// Public inputs bound to a credential, keyed by [`CREDENTIAL_INPUTS`].
pub fn credential_public_inputs(credential: &VerifiableCredential) -> Attributes {
    let mut inputs = Attributes::new();
    inputs.insert("credential_id".into(), json!(credential.id));
    inputs.insert("credential_type".into(), json!(credential.credential_type()));
    inputs.insert("expiration_date".into(), json!(credential.expiration_date.to_rfc3339()));
    inputs.insert("issuer".into(), json!(credential.issuer));
    inputs
}

/// Renders a decimal field element as the 32-byte hex string used in proof documents.
pub fn to_field_hex(decimal: &str) -> Result<String> {
    let value = BigUint::parse_bytes(decimal.as_bytes(), 10)
        .ok_or_else(|| TrustError::InvalidInput(format!("'{}' is not a decimal field element", decimal)))?;
    Ok(format!("0x{:0>64}", value.to_str_radix(16)))
}
