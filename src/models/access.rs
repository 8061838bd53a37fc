// src/models/access.rs
//! Access-control request, response, policy and audit types.

use crate::models::credential::{Attributes, VerifiableCredential};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attributes a resource requires. Every key must match exactly.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    pub required_attributes: Attributes,
}

impl AccessPolicy {
    pub fn new(required_attributes: Attributes) -> Self {
        Self {
            required_attributes,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Proof,
    Credential,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Proof => write!(f, "proof"),
            AccessMode::Credential => write!(f, "credential"),
        }
    }
}

/// An access request: either a reference to a previously generated proof or a
/// disclosed credential. Exactly one of the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AccessRequestWire", into = "AccessRequestWire")]
pub enum AccessRequest {
    Proof {
        proof_id: String,
        resource_id: String,
        action: String,
    },
    Credential {
        credential: Box<VerifiableCredential>,
        resource_id: String,
        action: String,
    },
}

impl AccessRequest {
    pub fn with_proof(
        proof_id: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        AccessRequest::Proof {
            proof_id: proof_id.into(),
            resource_id: resource_id.into(),
            action: action.into(),
        }
    }

    pub fn with_credential(
        credential: VerifiableCredential,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        AccessRequest::Credential {
            credential: Box::new(credential),
            resource_id: resource_id.into(),
            action: action.into(),
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self {
            AccessRequest::Proof { .. } => AccessMode::Proof,
            AccessRequest::Credential { .. } => AccessMode::Credential,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            AccessRequest::Proof { resource_id, .. }
            | AccessRequest::Credential { resource_id, .. } => resource_id,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            AccessRequest::Proof { action, .. } | AccessRequest::Credential { action, .. } => {
                action
            }
        }
    }

    /// Human-readable reference recorded in the audit log.
    pub fn reference(&self) -> &str {
        match self {
            AccessRequest::Proof { proof_id, .. } => proof_id,
            AccessRequest::Credential { credential, .. } => &credential.id,
        }
    }
}

/// Transport shape: `{proofId?, credential?, resourceId, action}`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessRequestWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proof_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential: Option<Box<VerifiableCredential>>,
    resource_id: String,
    action: String,
}

impl TryFrom<AccessRequestWire> for AccessRequest {
    type Error = String;

    fn try_from(wire: AccessRequestWire) -> Result<Self, Self::Error> {
        match (wire.proof_id, wire.credential) {
            (Some(proof_id), None) => Ok(AccessRequest::Proof {
                proof_id,
                resource_id: wire.resource_id,
                action: wire.action,
            }),
            (None, Some(credential)) => Ok(AccessRequest::Credential {
                credential,
                resource_id: wire.resource_id,
                action: wire.action,
            }),
            (Some(_), Some(_)) => Err("request carries both proofId and credential".into()),
            (None, None) => Err("request carries neither proofId nor credential".into()),
        }
    }
}

impl From<AccessRequest> for AccessRequestWire {
    fn from(request: AccessRequest) -> Self {
        match request {
            AccessRequest::Proof {
                proof_id,
                resource_id,
                action,
            } => AccessRequestWire {
                proof_id: Some(proof_id),
                credential: None,
                resource_id,
                action,
            },
            AccessRequest::Credential {
                credential,
                resource_id,
                action,
            } => AccessRequestWire {
                proof_id: None,
                credential: Some(credential),
                resource_id,
                action,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessResponse {
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One audit record. Appended once, never modified.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: AccessMode,
    /// Proof id or credential id
    pub request_ref: String,
    pub resource_id: String,
    pub action: String,
    pub granted: bool,
    pub reason: String,
    /// Whether the decision was served from the decision cache
    pub cached: bool,
}
