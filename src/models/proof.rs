// src/models/proof.rs
//! Zero-knowledge proof record as handed out by the proof pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata recorded when a proof is generated.
///
/// Verification re-derives the circuit and the credential-bound public inputs
/// from here rather than trusting the verifier's caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    pub generated_at: DateTime<Utc>,
    /// DID of the credential's issuer
    pub issuer: String,
    /// Expiration of the credential; the proof is worthless past it
    pub expiration_date: DateTime<Utc>,
    pub proof_type: String,
    /// SHA-256 of the circuit source the proof was produced against
    pub circuit_hash: String,
    /// Version of the witness encoding and proof-id scheme
    pub scheme_version: u32,
    /// Encoded credential-bound public inputs, in circuit order
    pub public_inputs: Vec<String>,
    /// Names of private inputs the circuit exposes as public outputs, sorted
    pub disclosed_inputs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// Deterministic in (credential id, proof type, issuance date)
    pub proof_id: String,
    pub proof_type: String,
    pub credential_id: String,
    /// Backend-opaque proof document
    #[serde(rename = "proof")]
    pub blob: Value,
    pub metadata: ProofMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let proof = Proof {
            proof_id: "zkp1-00".into(),
            proof_type: "access_control".into(),
            credential_id: "urn:vc:1".into(),
            blob: json!({"proof": {"a": []}, "inputs": []}),
            metadata: ProofMetadata {
                generated_at: Utc::now(),
                issuer: "did:lvc:commander".into(),
                expiration_date: Utc::now(),
                proof_type: "access_control".into(),
                circuit_hash: "ab".into(),
                scheme_version: 1,
                public_inputs: vec!["1".into()],
                disclosed_inputs: vec!["role".into()],
            },
        };
        let value = serde_json::to_value(&proof).unwrap();
        assert_eq!(value["proofId"], "zkp1-00");
        assert!(value["proof"]["inputs"].is_array());
        assert!(value["metadata"]["generatedAt"].is_string());
        assert!(value["metadata"]["expirationDate"].is_string());
        assert_eq!(value["metadata"]["issuer"], "did:lvc:commander");
        assert_eq!(value["metadata"]["disclosedInputs"][0], "role");
    }
}
