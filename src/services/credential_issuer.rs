// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Issues signed verifiable credentials and tracks their revocation.
//!
//! A credential's proof envelope carries an ES256 compact JWS whose claims are
//! the canonical credential payload, signed with the issuer DID's private key.
//! Issued credentials are appended to an in-memory issuance store; revocation
//! is recorded out-of-band in a [`RevocationList`] shared with the
//! [`Verifier`](crate::services::verifier::Verifier).

use crate::error::{Result, TrustError};
use crate::models::credential::{
    Attributes, CredentialPayload, CredentialProof, CredentialSubject, VerifiableCredential,
    SIGNATURE_PROOF_TYPE, VC_BASE_TYPE, VC_CONTEXT,
};
use crate::utils::clock::Clock;
use crate::utils::crypto::{random_bytes, sha256};
use crate::utils::serialization::encode_b64_url;
use crate::utils::worker_pool::WorkerPool;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Monotonically growing set of revoked credential ids.
///
/// `epoch` increases with every newly revoked id so caches can tell whether a
/// revocation happened since they stored a result.
#[derive(Debug, Default)]
pub struct RevocationList {
    ids: RwLock<HashSet<String>>,
    epoch: AtomicU64,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`. Returns `true` if it was not already revoked.
    pub fn revoke(&self, id: &str) -> bool {
        let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
        let added = ids.insert(id.to_string());
        if added {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        added
    }

    pub fn is_revoked(&self, id: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Issues credentials and owns the issuance store.
pub struct CredentialIssuer {
    /// Append-only store of issued credentials (the storage lock)
    issued: Mutex<HashMap<String, VerifiableCredential>>,
    revocations: Arc<RevocationList>,
    clock: Arc<dyn Clock>,
    pool: Arc<WorkerPool>,
}

impl CredentialIssuer {
    pub fn new(revocations: Arc<RevocationList>, pool: Arc<WorkerPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issued: Mutex::new(HashMap::new()),
            revocations,
            clock,
            pool,
        }
    }

    /// Issues a new verifiable credential.
    ///
    /// # Arguments
    /// * `subject_did` - DID the credential is about
    /// * `issuer_did` - DID of the issuing participant
    /// * `credential_type` - e.g. "simulation_access"
    /// * `attributes` - Asserted attributes such as role and clearance
    /// * `issuer_private_key` - PKCS#8 private key of the issuer's assertion method
    /// * `validity_days` - Days until expiration, must be positive
    ///
    /// # Errors
    /// - `InvalidInput` for a non-positive validity or an attribute named `id`
    /// - `Crypto` if the key cannot sign
    pub async fn issue_credential(
        &self,
        subject_did: &str,
        issuer_did: &str,
        credential_type: &str,
        attributes: Attributes,
        issuer_private_key: &[u8],
        validity_days: i64,
    ) -> Result<VerifiableCredential> {
        if validity_days <= 0 {
            return Err(TrustError::InvalidInput(format!(
                "validity must be positive, got {} day(s)",
                validity_days
            )));
        }
        if attributes.contains_key("id") {
            return Err(TrustError::InvalidInput(
                "attribute name 'id' is reserved for the subject DID".into(),
            ));
        }

        let now = self.clock.now();
        let id = credential_id(subject_did, credential_type, now)?;
        let payload = CredentialPayload {
            context: vec![VC_CONTEXT.to_string()],
            id: id.clone(),
            types: vec![VC_BASE_TYPE.to_string(), credential_type.to_string()],
            issuer: issuer_did.to_string(),
            issuance_date: now,
            expiration_date: now + Duration::days(validity_days),
            credential_subject: CredentialSubject {
                id: subject_did.to_string(),
                attributes,
            },
        };

        let verification_method = format!("{}#keys-1", issuer_did);
        let signed_token = {
            let payload = payload.clone();
            let key = issuer_private_key.to_vec();
            let kid = verification_method.clone();
            self.pool
                .spawn_blocking(move || sign_payload(&payload, &key, kid))
                .await?
        };

        let credential = VerifiableCredential::from_payload(
            payload,
            CredentialProof {
                proof_type: SIGNATURE_PROOF_TYPE.to_string(),
                created: now,
                proof_purpose: "assertionMethod".to_string(),
                verification_method,
                signed_token,
            },
        );

        self.issued
            .lock()
            .await
            .insert(id.clone(), credential.clone());
        info!(
            "issued credential {} ({}) from {} to {}",
            id, credential_type, issuer_did, subject_did
        );
        Ok(credential)
    }

    /// Revokes a credential issued here.
    ///
    /// # Returns
    /// `true` once the id is in the revocation set (repeat calls stay `true`),
    /// `false` for ids this issuer never issued, which are not recorded.
    pub async fn revoke_credential(&self, credential_id: &str) -> bool {
        if !self.issued.lock().await.contains_key(credential_id) {
            warn!("refusing to revoke unknown credential {}", credential_id);
            return false;
        }
        if self.revocations.revoke(credential_id) {
            info!("revoked credential {}", credential_id);
        }
        true
    }

    pub async fn get_credential(&self, credential_id: &str) -> Option<VerifiableCredential> {
        self.issued.lock().await.get(credential_id).cloned()
    }

    pub async fn issued_count(&self) -> usize {
        self.issued.lock().await.len()
    }

    pub fn revocations(&self) -> Arc<RevocationList> {
        self.revocations.clone()
    }
}

/// `urn:vc:` + 22 URL-safe base64 chars of SHA-256(subject | type | issuance instant | nonce).
fn credential_id(subject_did: &str, credential_type: &str, now: DateTime<Utc>) -> Result<String> {
    let nonce = random_bytes(16)?;
    let mut material = Vec::new();
    material.extend_from_slice(subject_did.as_bytes());
    material.push(b'|');
    material.extend_from_slice(credential_type.as_bytes());
    material.push(b'|');
    material.extend_from_slice(
        now.timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp())
            .to_be_bytes()
            .as_ref(),
    );
    material.push(b'|');
    material.extend_from_slice(&nonce);

    let encoded = encode_b64_url(&sha256(&material));
    Ok(format!("urn:vc:{}", &encoded[..22]))
}

fn sign_payload(payload: &CredentialPayload, pkcs8: &[u8], kid: String) -> Result<String> {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid);
    encode(&header, payload, &EncodingKey::from_ec_der(pkcs8))
        .map_err(|e| TrustError::Crypto(format!("signing credential: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::SystemClock;
    use crate::utils::crypto::generate_keypair;
    use serde_json::json;

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new(
            Arc::new(RevocationList::new()),
            Arc::new(WorkerPool::new(2, 8)),
            Arc::new(SystemClock),
        )
    }

    fn attributes() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("role".into(), json!("operator"));
        attrs.insert("clearance".into(), json!("high"));
        attrs
    }

    #[tokio::test]
    async fn test_issued_credential_shape() {
        let issuer = issuer();
        let keys = generate_keypair().unwrap();
        let vc = issuer
            .issue_credential("did:lvc:sub", "did:lvc:iss", "simulation_access", attributes(), &keys.private_key, 30)
            .await
            .unwrap();

        assert!(vc.id.starts_with("urn:vc:"));
        assert_eq!(vc.types, vec!["VerifiableCredential", "simulation_access"]);
        assert_eq!(vc.expiration_date - vc.issuance_date, Duration::days(30));
        assert_eq!(vc.proof.verification_method, "did:lvc:iss#keys-1");
        assert_eq!(vc.proof.signed_token.split('.').count(), 3);
        assert_eq!(issuer.get_credential(&vc.id).await, Some(vc));
    }

    #[tokio::test]
    async fn test_ids_are_unique_per_issuance() {
        let issuer = issuer();
        let keys = generate_keypair().unwrap();
        let a = issuer
            .issue_credential("did:lvc:s", "did:lvc:i", "t", attributes(), &keys.private_key, 1)
            .await
            .unwrap();
        let b = issuer
            .issue_credential("did:lvc:s", "did:lvc:i", "t", attributes(), &keys.private_key, 1)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(issuer.issued_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_inputs() {
        let issuer = issuer();
        let keys = generate_keypair().unwrap();
        let zero_days = issuer
            .issue_credential("s", "i", "t", attributes(), &keys.private_key, 0)
            .await;
        assert!(matches!(zero_days, Err(TrustError::InvalidInput(_))));

        let bad_key = issuer
            .issue_credential("s", "i", "t", attributes(), b"not a key", 5)
            .await;
        assert!(matches!(bad_key, Err(TrustError::Crypto(_))));
        assert_eq!(issuer.issued_count().await, 0);
    }

    #[tokio::test]
    async fn test_revocation_is_idempotent_and_monotonic() {
        let issuer = issuer();
        let keys = generate_keypair().unwrap();
        let vc = issuer
            .issue_credential("s", "i", "t", attributes(), &keys.private_key, 5)
            .await
            .unwrap();

        let revocations = issuer.revocations();
        assert!(issuer.revoke_credential(&vc.id).await);
        assert_eq!(revocations.epoch(), 1);
        assert!(issuer.revoke_credential(&vc.id).await);
        assert_eq!(revocations.epoch(), 1);
        assert!(revocations.is_revoked(&vc.id));

        assert!(!issuer.revoke_credential("urn:vc:unknown").await);
        assert_eq!(revocations.len(), 1);
    }
}
