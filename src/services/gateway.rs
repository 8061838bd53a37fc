// src/services/gateway.rs
//! Access gateway for simulation resources.
//!
//! Turns an [`AccessRequest`] into a terminal grant/deny decision:
//!
//! 1. The resource must have a policy
//! 2. A recent decision for the same (mode, identifier, resource, action) is
//!    reused unless a credential or DID has been revoked since it was made
//! 3. Proof requests are checked against the proof pipeline plus the
//!    credential facts recorded with the proof (revocation, expiry, issuer DID);
//!    credential requests against the issuer's DID document and the verifier
//! 4. Every request, cached or not, is appended to the audit log
//!
//! Failures of the underlying services never escape: they become denials with
//! a reason.

use crate::error::TrustError;
use crate::models::access::{AccessLogEntry, AccessPolicy, AccessRequest, AccessResponse};
use crate::models::credential::VerifiableCredential;
use crate::services::credential_issuer::RevocationList;
use crate::services::did_registry::DidRegistry;
use crate::services::verifier::Verifier;
use crate::utils::cache::TtlCache;
use crate::utils::clock::Clock;
use crate::utils::crypto::sha256_hex;
use crate::utils::serialization::canonical_digest;
use crate::zkp::ProofPipeline;
use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub const REASON_GRANTED: &str = "access granted";
pub const REASON_NO_POLICY: &str = "no policy for resource";
pub const REASON_INVALID_PROOF_ID: &str = "invalid proof id";
pub const REASON_ISSUER_NOT_FOUND: &str = "issuer not found";
pub const REASON_REVOKED: &str = "credential revoked";
pub const REASON_EXPIRED: &str = "credential expired";
pub const REASON_INVALID_SIGNATURE: &str = "invalid credential signature";
pub const REASON_PROOF_FAILED: &str = "proof verification failed";

#[derive(Debug, Clone)]
struct Decision {
    granted: bool,
    reason: String,
    /// Faults of the underlying services are not worth remembering
    cacheable: bool,
}

impl Decision {
    fn grant() -> Self {
        Self {
            granted: true,
            reason: REASON_GRANTED.to_string(),
            cacheable: true,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
            cacheable: true,
        }
    }

    fn fault(err: impl std::fmt::Display) -> Self {
        Self {
            granted: false,
            reason: format!("verification error: {}", err),
            cacheable: false,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedDecision {
    granted: bool,
    reason: String,
    revocation_epoch: u64,
}

pub struct AccessGateway {
    registry: Arc<DidRegistry>,
    verifier: Arc<Verifier>,
    pipeline: Arc<ProofPipeline>,
    revocations: Arc<RevocationList>,
    policies: RwLock<HashMap<String, AccessPolicy>>,
    decisions: TtlCache<String, CachedDecision>,
    log: Mutex<Vec<AccessLogEntry>>,
    clock: Arc<dyn Clock>,
}

impl AccessGateway {
    pub fn new(
        registry: Arc<DidRegistry>,
        verifier: Arc<Verifier>,
        pipeline: Arc<ProofPipeline>,
        revocations: Arc<RevocationList>,
        clock: Arc<dyn Clock>,
        decision_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            verifier,
            pipeline,
            revocations,
            policies: RwLock::new(HashMap::new()),
            decisions: TtlCache::new(decision_ttl, clock.clone()),
            log: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Registers the policy for `resource_id`, replacing any previous one.
    ///
    /// Cached decisions are dropped, since they were made under the old policy.
    pub fn add_access_policy(&self, resource_id: &str, policy: AccessPolicy) {
        let previous = self
            .policies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource_id.to_string(), policy);
        self.decisions.retain(|_| false);
        if previous.is_some() {
            info!("replaced access policy for {}", resource_id);
        } else {
            info!("added access policy for {}", resource_id);
        }
    }

    pub fn policy(&self, resource_id: &str) -> Option<AccessPolicy> {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource_id)
            .cloned()
    }

    /// Decides an access request. Never fails; every problem is a denial.
    pub async fn handle_access_request(&self, request: &AccessRequest) -> AccessResponse {
        let policy = match self.policy(request.resource_id()) {
            Some(policy) => policy,
            None => return self.respond(request, Decision::deny(REASON_NO_POLICY), false),
        };

        let key = match decision_key(request) {
            Ok(key) => key,
            Err(e) => return self.respond(request, Decision::fault(e), false),
        };
        // Read before evaluating, so a revocation racing with evaluation
        // leaves the stored decision stale rather than trusted.
        let epoch = self.revocation_epoch();
        if let Some(cached) = self.decisions.get(&key) {
            if cached.revocation_epoch == epoch {
                let decision = Decision {
                    granted: cached.granted,
                    reason: cached.reason,
                    cacheable: true,
                };
                return self.respond(request, decision, true);
            }
            debug!("decision for {} predates a revocation", request.reference());
        }

        let decision = match request {
            AccessRequest::Proof {
                proof_id,
                resource_id,
                action,
            } => self.evaluate_proof(proof_id, resource_id, action, &policy).await,
            AccessRequest::Credential { credential, .. } => {
                self.evaluate_credential(credential, &policy).await
            }
        };

        if decision.cacheable {
            self.decisions.insert(
                key,
                CachedDecision {
                    granted: decision.granted,
                    reason: decision.reason.clone(),
                    revocation_epoch: epoch,
                },
            );
        }
        self.respond(request, decision, false)
    }

    /// Snapshot of the audit log, oldest first.
    pub fn access_logs(&self) -> Vec<AccessLogEntry> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sum of the credential and DID revocation counters; changes on any revocation.
    fn revocation_epoch(&self) -> u64 {
        self.revocations.epoch() + self.registry.revocation_epoch()
    }

    async fn evaluate_proof(
        &self,
        proof_id: &str,
        resource_id: &str,
        action: &str,
        policy: &AccessPolicy,
    ) -> Decision {
        let proof = match self.pipeline.cached_proof(proof_id) {
            Some(proof) => proof,
            None => return Decision::deny(REASON_INVALID_PROOF_ID),
        };
        if self.revocations.is_revoked(&proof.credential_id) {
            return Decision::deny(REASON_REVOKED);
        }
        if self.clock.now() > proof.metadata.expiration_date {
            return Decision::deny(REASON_EXPIRED);
        }
        match self.registry.resolve_did(&proof.metadata.issuer).await {
            Ok(Some(_)) => {}
            Ok(None) => return Decision::deny(REASON_ISSUER_NOT_FOUND),
            Err(e) => return Decision::fault(e),
        }
        // A requirement the proof does not speak to cannot be satisfied by it.
        if let Some(key) = policy
            .required_attributes
            .keys()
            .find(|key| !proof.metadata.disclosed_inputs.contains(*key))
        {
            return Decision::deny(format!("attribute mismatch: {}", key));
        }

        let mut public_inputs = policy.required_attributes.clone();
        public_inputs.insert("resource_id".into(), json!(resource_id));
        public_inputs.insert("action".into(), json!(action));

        match self.pipeline.verify_proof(&proof, &public_inputs).await {
            Ok(true) => Decision::grant(),
            Ok(false) => Decision::deny(REASON_PROOF_FAILED),
            Err(e) => {
                warn!("verifying proof {} failed: {}", proof_id, e);
                Decision::fault(e)
            }
        }
    }

    async fn evaluate_credential(&self, credential: &VerifiableCredential, policy: &AccessPolicy) -> Decision {
        match self
            .verifier
            .verify_against_registry(credential, &self.registry)
            .await
        {
            Ok(()) => {}
            Err(TrustError::NotFound { .. }) => return Decision::deny(REASON_ISSUER_NOT_FOUND),
            Err(TrustError::Revoked(_)) => return Decision::deny(REASON_REVOKED),
            Err(TrustError::Expired(_)) => return Decision::deny(REASON_EXPIRED),
            Err(TrustError::InvalidSignature(reason)) => {
                debug!("credential {} signature rejected: {}", credential.id, reason);
                return Decision::deny(REASON_INVALID_SIGNATURE);
            }
            Err(e) => return Decision::fault(e),
        }

        for (key, required) in &policy.required_attributes {
            if credential.attribute(key) != Some(required) {
                return Decision::deny(format!("attribute mismatch: {}", key));
            }
        }
        Decision::grant()
    }

    fn respond(&self, request: &AccessRequest, decision: Decision, cached: bool) -> AccessResponse {
        let timestamp = self.clock.now();
        info!(
            "{} {} on {} via {} {}: {}{}",
            if decision.granted { "granted" } else { "denied" },
            request.action(),
            request.resource_id(),
            request.mode(),
            request.reference(),
            decision.reason,
            if cached { " (cached)" } else { "" }
        );
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AccessLogEntry {
                timestamp,
                mode: request.mode(),
                request_ref: request.reference().to_string(),
                resource_id: request.resource_id().to_string(),
                action: request.action().to_string(),
                granted: decision.granted,
                reason: decision.reason.clone(),
                cached,
            });
        AccessResponse {
            granted: decision.granted,
            reason: Some(decision.reason),
            timestamp,
        }
    }
}

/// SHA-256 over `mode | identifier | resource | action`. Credentials are
/// identified by the digest of their full content.
fn decision_key(request: &AccessRequest) -> crate::error::Result<String> {
    let identifier = match request {
        AccessRequest::Proof { proof_id, .. } => proof_id.clone(),
        AccessRequest::Credential { credential, .. } => canonical_digest(&**credential)?,
    };
    Ok(sha256_hex(
        format!(
            "{}|{}|{}|{}",
            request.mode(),
            identifier,
            request.resource_id(),
            request.action()
        )
        .as_bytes(),
    ))
}
