// src/services/verifier.rs
//! Credential verification service.
//!
//! Checks run in a fixed order so the cheap ones fail fast:
//! 1. Cached result for this credential and key
//! 2. Revocation set membership
//! 3. Expiration against the current time
//! 4. ES256 signature over the signed payload
//! 5. Signed payload matches the presented credential (id first, then content)
//!
//! Results, failures included, are cached under their own lock, independent of
//! the issuer's storage lock. A cached result stored before the most recent
//! revocation is ignored.

use crate::error::{Result, TrustError};
use crate::models::credential::{CredentialPayload, VerifiableCredential};
use crate::services::credential_issuer::RevocationList;
use crate::services::did_registry::DidRegistry;
use crate::utils::cache::TtlCache;
use crate::utils::clock::Clock;
use crate::utils::crypto::sha256_hex;
use crate::utils::serialization::canonical_digest;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Failure {
    Revoked,
    Expired,
    InvalidSignature(String),
}

#[derive(Debug, Clone)]
struct CachedVerification {
    failure: Option<Failure>,
    revocation_epoch: u64,
    expiration_date: DateTime<Utc>,
}

/// Verifies credentials against an issuer public key.
///
/// Safe to share across any number of concurrent callers.
pub struct Verifier {
    revocations: Arc<RevocationList>,
    cache: TtlCache<String, CachedVerification>,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    pub fn new(revocations: Arc<RevocationList>, clock: Arc<dyn Clock>, cache_ttl: Duration) -> Self {
        Self {
            revocations,
            cache: TtlCache::new(cache_ttl, clock.clone()),
            clock,
        }
    }

    /// Verifies a credential, reporting only validity.
    pub fn verify_credential(&self, credential: &VerifiableCredential, issuer_public_key: &[u8]) -> bool {
        self.verify_credential_detailed(credential, issuer_public_key)
            .is_ok()
    }

    /// Verifies a credential, naming the check that failed.
    ///
    /// # Arguments
    /// * `credential` - The presented credential
    /// * `issuer_public_key` - Uncompressed P-256 point of the issuer's assertion key
    ///
    /// # Errors
    /// `Revoked`, `Expired` or `InvalidSignature`
    pub fn verify_credential_detailed(
        &self,
        credential: &VerifiableCredential,
        issuer_public_key: &[u8],
    ) -> Result<()> {
        let epoch = self.revocations.epoch();
        let key = cache_key(credential, issuer_public_key)?;

        if let Some(cached) = self.cache.get(&key) {
            if cached.revocation_epoch == epoch {
                debug!("verification cache hit for {}", credential.id);
                return match cached.failure {
                    None if self.clock.now() > cached.expiration_date => {
                        Err(TrustError::Expired(credential.id.clone()))
                    }
                    None => Ok(()),
                    Some(failure) => Err(to_error(failure, &credential.id)),
                };
            }
            debug!("verification cache entry for {} predates a revocation", credential.id);
        }

        let failure = self.run_checks(credential, issuer_public_key);
        self.cache.insert(
            key,
            CachedVerification {
                failure: failure.clone(),
                revocation_epoch: epoch,
                expiration_date: credential.expiration_date,
            },
        );
        match failure {
            None => Ok(()),
            Some(failure) => Err(to_error(failure, &credential.id)),
        }
    }

    /// Resolves the credential's issuer in `registry` and verifies against the
    /// issuer's current assertion key.
    ///
    /// # Errors
    /// - `NotFound` (kind `"issuer"`) when the issuer DID is unknown, revoked or
    ///   carries no assertion key
    /// - `Revoked`, `Expired` or `InvalidSignature` as for
    ///   [`verify_credential_detailed`](Self::verify_credential_detailed)
    /// - `StorageFailure` when the registry cannot be read
    pub async fn verify_against_registry(
        &self,
        credential: &VerifiableCredential,
        registry: &DidRegistry,
    ) -> Result<()> {
        let document = registry
            .resolve_did(&credential.issuer)
            .await?
            .ok_or_else(|| TrustError::not_found("issuer", credential.issuer.as_str()))?;
        let public_key = document
            .public_key_bytes()
            .ok_or_else(|| TrustError::not_found("issuer", credential.issuer.as_str()))??;
        self.verify_credential_detailed(credential, &public_key)
    }

    fn run_checks(&self, credential: &VerifiableCredential, issuer_public_key: &[u8]) -> Option<Failure> {
        if self.revocations.is_revoked(&credential.id) {
            return Some(Failure::Revoked);
        }
        if self.clock.now() > credential.expiration_date {
            return Some(Failure::Expired);
        }

        let signed = match decode_signed_payload(&credential.proof.signed_token, issuer_public_key) {
            Ok(payload) => payload,
            Err(reason) => return Some(Failure::InvalidSignature(reason)),
        };

        if signed.id != credential.id {
            return Some(Failure::InvalidSignature(format!(
                "signed payload is for {}, not {}",
                signed.id, credential.id
            )));
        }
        if signed != credential.payload() {
            return Some(Failure::InvalidSignature(
                "credential content differs from signed payload".into(),
            ));
        }
        None
    }
}

fn decode_signed_payload(token: &str, public_key: &[u8]) -> std::result::Result<CredentialPayload, String> {
    let mut validation = Validation::new(Algorithm::ES256);
    // Expiration is checked against the credential fields and the injected clock.
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<CredentialPayload>(token, &DecodingKey::from_ec_der(public_key), &validation)
        .map(|data| data.claims)
        .map_err(|e| e.to_string())
}

fn cache_key(credential: &VerifiableCredential, public_key: &[u8]) -> Result<String> {
    Ok(format!(
        "{}|{}|{}",
        credential.id,
        sha256_hex(public_key),
        canonical_digest(credential)?
    ))
}

fn to_error(failure: Failure, credential_id: &str) -> TrustError {
    match failure {
        Failure::Revoked => TrustError::Revoked(credential_id.to_string()),
        Failure::Expired => TrustError::Expired(credential_id.to_string()),
        Failure::InvalidSignature(reason) => TrustError::InvalidSignature(reason),
    }
}
