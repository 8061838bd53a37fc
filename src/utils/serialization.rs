// src/utils/serialization.rs
//! Serialization utilities.
//!
//! Provides:
//! - Canonical JSON (sorted object keys, no whitespace) for signing and hashing
//! - Base64 helpers for key material and identifiers

use crate::error::{Result, TrustError};
use serde::Serialize;

/// Serializes a value to canonical JSON.
///
/// The value is routed through `serde_json::Value`, whose object map is ordered
/// by key, so two structurally equal values always yield identical bytes.
pub fn to_canonical_json<T: Serialize>(data: &T) -> Result<String> {
    let value = serde_json::to_value(data)?;
    Ok(serde_json::to_string(&value)?)
}

/// SHA-256 hex digest of a value's canonical JSON.
pub fn canonical_digest<T: Serialize>(data: &T) -> Result<String> {
    let json = to_canonical_json(data)?;
    Ok(crate::utils::crypto::sha256_hex(json.as_bytes()))
}

pub fn encode_b64(bytes: &[u8]) -> String {
    base64::encode(bytes)
}

pub fn decode_b64(data: &str) -> Result<Vec<u8>> {
    base64::decode(data).map_err(|e| TrustError::InvalidInput(format!("bad base64: {}", e)))
}

/// URL-safe base64 without padding, used inside identifiers.
pub fn encode_b64_url(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}
