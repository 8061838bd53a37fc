// src/models/credential.rs
//! Verifiable Credential data model.
//!
//! Follows the [W3C Verifiable Credentials Data Model](https://www.w3.org/TR/vc-data-model/)
//! wire shape:
//!
//! ```json
//! {
//!   "@context": [...],
//!   "id": "urn:vc:...",
//!   "type": ["VerifiableCredential", "simulation_access"],
//!   "issuer": "did:lvc:...",
//!   "issuanceDate": "2024-01-01T00:00:00Z",
//!   "expirationDate": "2024-01-31T00:00:00Z",
//!   "credentialSubject": { "id": "did:lvc:...", "role": "operator" },
//!   "proof": { "type": "...", "signedToken": "<compact JWS>" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const VC_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";

pub const VC_BASE_TYPE: &str = "VerifiableCredential";

pub const SIGNATURE_PROOF_TYPE: &str = "EcdsaSecp256r1Signature2019";

/// Credential attributes, ordered by key so the canonical payload is stable
pub type Attributes = BTreeMap<String, Value>;

/// The subject a credential speaks about, plus its asserted attributes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialSubject {
    /// DID of the credential subject
    pub id: String,

    #[serde(flatten)]
    pub attributes: Attributes,
}

/// Signature envelope attached at issuance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: DateTime<Utc>,
    pub proof_purpose: String,
    pub verification_method: String,
    /// Compact JWS whose claims are the canonical credential payload
    pub signed_token: String,
}

/// Everything in a credential except its proof. This is what gets signed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub issuer: String,
    pub issuance_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub credential_subject: CredentialSubject,
}

/// A signed Verifiable Credential.
///
/// Immutable after issuance. Revocation is tracked out-of-band by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// Unique per issuance, e.g. "urn:vc:Qm2c0cf1bBFg4yPzS3CgJw"
    pub id: String,

    #[serde(rename = "type")]
    pub types: Vec<String>,

    /// DID of the credential issuer
    pub issuer: String,

    pub issuance_date: DateTime<Utc>,

    pub expiration_date: DateTime<Utc>,

    pub credential_subject: CredentialSubject,

    pub proof: CredentialProof,
}

impl VerifiableCredential {
    pub fn from_payload(payload: CredentialPayload, proof: CredentialProof) -> Self {
        VerifiableCredential {
            context: payload.context,
            id: payload.id,
            types: payload.types,
            issuer: payload.issuer,
            issuance_date: payload.issuance_date,
            expiration_date: payload.expiration_date,
            credential_subject: payload.credential_subject,
            proof,
        }
    }

    /// The signed portion of the credential.
    pub fn payload(&self) -> CredentialPayload {
        CredentialPayload {
            context: self.context.clone(),
            id: self.id.clone(),
            types: self.types.clone(),
            issuer: self.issuer.clone(),
            issuance_date: self.issuance_date,
            expiration_date: self.expiration_date,
            credential_subject: self.credential_subject.clone(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.credential_subject.id
    }

    /// The specific credential type, i.e. the entry after `VerifiableCredential`.
    pub fn credential_type(&self) -> &str {
        self.types
            .iter()
            .find(|t| t.as_str() != VC_BASE_TYPE)
            .map(String::as_str)
            .unwrap_or(VC_BASE_TYPE)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.credential_subject.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.credential_subject.attributes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> VerifiableCredential {
        let now = Utc::now();
        let mut attributes = Attributes::new();
        attributes.insert("role".into(), json!("operator"));
        attributes.insert("clearance".into(), json!("high"));
        VerifiableCredential {
            context: vec![VC_CONTEXT.into()],
            id: "urn:vc:abc".into(),
            types: vec![VC_BASE_TYPE.into(), "simulation_access".into()],
            issuer: "did:lvc:issuer".into(),
            issuance_date: now,
            expiration_date: now + chrono::Duration::days(30),
            credential_subject: CredentialSubject {
                id: "did:lvc:subject".into(),
                attributes,
            },
            proof: CredentialProof {
                proof_type: SIGNATURE_PROOF_TYPE.into(),
                created: now,
                proof_purpose: "assertionMethod".into(),
                verification_method: "did:lvc:issuer#keys-1".into(),
                signed_token: "header.payload.sig".into(),
            },
        }
    }

    #[test]
    fn test_subject_attributes_are_flattened() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["credentialSubject"]["id"], "did:lvc:subject");
        assert_eq!(value["credentialSubject"]["role"], "operator");
        assert_eq!(value["proof"]["signedToken"], "header.payload.sig");
        assert_eq!(value["type"][1], "simulation_access");
    }

    #[test]
    fn test_wire_form_parses_back() {
        let vc = sample();
        let parsed: VerifiableCredential =
            serde_json::from_str(&serde_json::to_string(&vc).unwrap()).unwrap();
        assert_eq!(parsed, vc);
        assert_eq!(parsed.attribute("clearance"), Some(&json!("high")));
    }

    #[test]
    fn test_payload_excludes_proof() {
        let vc = sample();
        let payload = serde_json::to_value(vc.payload()).unwrap();
        assert!(payload.get("proof").is_none());
        assert_eq!(payload["id"], "urn:vc:abc");
        assert_eq!(vc.credential_type(), "simulation_access");
    }
}
