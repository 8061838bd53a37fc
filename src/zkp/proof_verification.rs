// src/zkp/proof_verification.rs
//! # Zero-Knowledge Proof Verification
//!
//! Verification never trusts a caller-supplied circuit. The circuit is
//! re-derived from the proof's own metadata, and the public input vector is
//! rebuilt as:
//!
//! 1. the credential-bound inputs recorded at generation time, then
//! 2. the caller's expected value for every disclosed private input, encoded
//!    exactly as the witness encoded it
//!
//! so a proof only verifies if the hidden attributes equal what the caller
//! requires.
//!
//! ## Security Considerations
//! - A proof produced against a different circuit source is rejected without
//!   calling the backend
//! - Only successful verifications are cached

use super::proof_generation::ProofPipeline;
use crate::error::{Result, TrustError};
use crate::models::credential::Attributes;
use crate::models::proof::Proof;
use crate::utils::crypto::{random_bytes, sha256_hex, to_hex};
use crate::zkp::witness::{encode_value, ENCODING_VERSION};
use log::{debug, info, warn};

impl ProofPipeline {
    /// Verifies `proof` against the caller's expected public inputs.
    ///
    /// Keys of `public_inputs` that the proof does not disclose are ignored.
    ///
    /// # Returns
    /// - `Ok(true)` if the backend accepts the proof with the rebuilt inputs
    /// - `Ok(false)` if it rejects them, a disclosed input is missing from
    ///   `public_inputs`, or the metadata does not match the current circuit
    ///
    /// # Errors
    /// `NotFound` for an unknown circuit, `InvalidInput` for an unknown scheme
    /// version or unencodable value, and backend `Timeout` / `ExternalProcessFailure`
    pub async fn verify_proof(&self, proof: &Proof, public_inputs: &Attributes) -> Result<bool> {
        let metadata = &proof.metadata;
        if metadata.scheme_version != ENCODING_VERSION {
            return Err(TrustError::InvalidInput(format!(
                "unsupported proof scheme version {}",
                metadata.scheme_version
            )));
        }
        if proof.proof_type != metadata.proof_type {
            warn!("proof {} declares type {} but was generated for {}", proof.proof_id, proof.proof_type, metadata.proof_type);
            return Ok(false);
        }

        let mut expected = metadata.public_inputs.clone();
        for name in &metadata.disclosed_inputs {
            match public_inputs.get(name) {
                Some(value) => expected.push(encode_value(name, value)?),
                None => {
                    debug!("verification of {} lacks disclosed input '{}'", proof.proof_id, name);
                    return Ok(false);
                }
            }
        }

        let cache_key = format!(
            "{}|{}|{}",
            metadata.proof_type,
            proof.proof_id,
            sha256_hex(expected.join(",").as_bytes())
        );
        if self.verifications.get(&cache_key).is_some() {
            debug!("verification cache hit for {}", proof.proof_id);
            return Ok(true);
        }

        let circuit = self.compile_circuit(&metadata.proof_type).await?;
        if circuit.circuit_hash != metadata.circuit_hash {
            warn!(
                "proof {} was generated against another version of circuit {}",
                proof.proof_id, circuit.name
            );
            return Ok(false);
        }
        let setup = self.setup_circuit(&circuit).await?;

        let scratch_dir = circuit.dir.join("verify");
        tokio::fs::create_dir_all(&scratch_dir).await?;
        let scratch = scratch_dir.join(format!("{}.json", to_hex(&random_bytes(8)?)));

        let valid = self
            .stage(
                "verify",
                self.backend
                    .verify(&setup.verification_key, &proof.blob, &expected, &scratch),
            )
            .await?;

        if valid {
            self.verifications.insert(cache_key, true);
            info!("verified proof {}", proof.proof_id);
        } else {
            info!("proof {} rejected by backend", proof.proof_id);
        }
        Ok(valid)
    }
}
