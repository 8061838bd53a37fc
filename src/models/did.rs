// src/models/did.rs
//! Decentralized Identifier (DID) data model.
//!
//! Documents follow the shape of the [DID Core Specification](https://www.w3.org/TR/did-core/)
//! with one extension: the controller's private key travels with the
//! verification method inside the registry, and is stripped by
//! [`DIDDocument::public_view`] before a document leaves the controller's hands.

use crate::error::Result;
use crate::utils::crypto::sha256;
use crate::utils::serialization::{decode_b64, encode_b64, encode_b64_url};
use serde::{Deserialize, Serialize};

/// DID method prefix used by this system
pub const DID_METHOD_PREFIX: &str = "did:lvc:";

pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

pub const VERIFICATION_KEY_TYPE: &str = "EcdsaSecp256r1VerificationKey2019";

/// Derives the content-addressed DID for a public key.
///
/// `did:lvc:` followed by the URL-safe base64 of the first 16 bytes of
/// SHA-256(public key). The same key always yields the same identifier.
pub fn derive_did(public_key: &[u8]) -> String {
    let digest = sha256(public_key);
    format!("{}{}", DID_METHOD_PREFIX, encode_b64_url(&digest[..16]))
}

/// A key entry in a DID document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// Example: "did:lvc:3q2-7wAAAAAAAAAAAAAAAA#keys-1"
    pub id: String,

    #[serde(rename = "type")]
    pub key_type: String,

    pub controller: String,

    /// Base64 of the uncompressed P-256 public point
    pub public_key: String,

    /// Base64 PKCS#8 private key, present only in the controller's copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// A DID Document representing a simulation participant.
///
/// Immutable once issued: the registry never patches a document in place,
/// it only removes it on revocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DIDDocument {
    #[serde(rename = "@context")]
    pub context: String,

    /// The complete DID string, e.g. "did:lvc:3q2-7wAAAAAAAAAAAAAAAA"
    pub id: String,

    #[serde(rename = "verificationMethod")]
    pub verification_methods: Vec<VerificationMethod>,

    pub authentication: Vec<String>,

    pub assertion_method: Vec<String>,

    /// Role of the participant in the simulation, e.g. "commander", "operator"
    pub participant_type: String,
}

impl DIDDocument {
    /// Builds a document for freshly generated key material.
    pub fn new(participant_type: &str, public_key: &[u8], private_key: &[u8]) -> Self {
        let did = derive_did(public_key);
        let key_id = format!("{}#keys-1", did);
        DIDDocument {
            context: DID_CONTEXT.to_string(),
            id: did.clone(),
            verification_methods: vec![VerificationMethod {
                id: key_id.clone(),
                key_type: VERIFICATION_KEY_TYPE.to_string(),
                controller: did,
                public_key: encode_b64(public_key),
                private_key: Some(encode_b64(private_key)),
            }],
            authentication: vec![key_id.clone()],
            assertion_method: vec![key_id],
            participant_type: participant_type.to_string(),
        }
    }

    /// The assertion key used to verify credentials this DID issues.
    pub fn assertion_key(&self) -> Option<&VerificationMethod> {
        self.assertion_method
            .first()
            .and_then(|id| self.verification_methods.iter().find(|vm| &vm.id == id))
            .or_else(|| self.verification_methods.first())
    }

    /// Raw public key bytes of the assertion key.
    pub fn public_key_bytes(&self) -> Option<Result<Vec<u8>>> {
        self.assertion_key().map(|vm| decode_b64(&vm.public_key))
    }

    /// Raw PKCS#8 private key bytes, if this copy holds them.
    pub fn private_key_bytes(&self) -> Option<Result<Vec<u8>>> {
        self.assertion_key()
            .and_then(|vm| vm.private_key.as_deref())
            .map(decode_b64)
    }

    /// A copy safe to hand to anyone but the controller.
    pub fn public_view(&self) -> DIDDocument {
        let mut doc = self.clone();
        for vm in &mut doc.verification_methods {
            vm.private_key = None;
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DIDDocument {
        DIDDocument::new("commander", &[4u8; 65], &[7u8; 32])
    }

    #[test]
    fn test_did_is_content_addressed() {
        assert_eq!(derive_did(&[4u8; 65]), derive_did(&[4u8; 65]));
        assert_ne!(derive_did(&[4u8; 65]), derive_did(&[5u8; 65]));
        assert!(derive_did(&[1]).starts_with(DID_METHOD_PREFIX));
    }

    #[test]
    fn test_document_references_its_key() {
        let doc = sample();
        let vm = doc.assertion_key().unwrap();
        assert_eq!(vm.controller, doc.id);
        assert_eq!(doc.authentication, vec![format!("{}#keys-1", doc.id)]);
        assert_eq!(doc.public_key_bytes().unwrap().unwrap(), vec![4u8; 65]);
    }

    #[test]
    fn test_public_view_strips_private_key() {
        let doc = sample();
        assert!(doc.private_key_bytes().is_some());
        let public = doc.public_view();
        assert!(public.private_key_bytes().is_none());
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("privateKey"));
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["participantType"], "commander");
        assert!(value["verificationMethod"][0]["publicKey"].is_string());
        assert!(value["assertionMethod"].is_array());
        assert_eq!(value["@context"], DID_CONTEXT);
    }
}
