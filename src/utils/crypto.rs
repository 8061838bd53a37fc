// src/utils/crypto.rs
//! Cryptographic helpers built on `ring`.
//!
//! - SHA-256 digests for content addressing and cache keys
//! - ECDSA P-256 key generation for DID verification methods
//! - HKDF-SHA256 for deterministic identifier derivation

use crate::error::{Result, TrustError};
use ring::digest::{digest, SHA256};
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

/// Freshly generated key material.
///
/// `public_key` is the uncompressed SEC1 point (65 bytes), `private_key` the
/// PKCS#8 v1 document that `ring` and `jsonwebtoken` both accept for ES256.
#[derive(Clone)]
pub struct KeyMaterial {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &to_hex(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generates a new ECDSA P-256 keypair.
///
/// P-256 gives ~128-bit security, above the RSA-2048 floor the registry requires.
/// This is CPU work; callers run it on the worker pool.
pub fn generate_keypair() -> Result<KeyMaterial> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|_| TrustError::Crypto("P-256 key generation failed".into()))?;
    let public_key = public_key_from_private(pkcs8.as_ref())?;
    Ok(KeyMaterial {
        public_key,
        private_key: pkcs8.as_ref().to_vec(),
    })
}

/// Derives the uncompressed public point from a PKCS#8 private key.
pub fn public_key_from_private(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8)
        .map_err(|e| TrustError::Crypto(format!("invalid private key: {}", e)))?;
    Ok(key_pair.public_key().as_ref().to_vec())
}

/// Computes a SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// SHA-256 as lowercase hex, used for cache keys and artifact directories.
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&sha256(data))
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fills `len` bytes from the system CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| TrustError::Crypto("system random source unavailable".into()))?;
    Ok(buf)
}

struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA256 with an empty salt.
pub fn hkdf_sha256(ikm: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(ikm);
    let info = [info];
    let okm = prk
        .expand(&info, OutputLen(len))
        .map_err(|_| TrustError::Crypto("hkdf output length out of range".into()))?;
    let mut out = vec![0u8; len];
    okm.fill(&mut out)
        .map_err(|_| TrustError::Crypto("hkdf expansion failed".into()))?;
    Ok(out)
}
