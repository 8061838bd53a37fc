// tests/access_scenarios.rs
//! End-to-end commander/operator scenarios across all four components.

use lvc_trust::models::access::{AccessPolicy, AccessRequest};
use lvc_trust::models::credential::{Attributes, VerifiableCredential};
use lvc_trust::services::credential_issuer::{CredentialIssuer, RevocationList};
use lvc_trust::services::did_registry::DidRegistry;
use lvc_trust::services::gateway::AccessGateway;
use lvc_trust::services::verifier::Verifier;
use lvc_trust::storage::did_store::JsonFileDidStore;
use lvc_trust::utils::clock::{Clock, ManualClock};
use lvc_trust::utils::worker_pool::WorkerPool;
use lvc_trust::zkp::scripted::{ScriptedBackend, ACCESS_CONTROL_CIRCUIT};
use lvc_trust::zkp::{derive_proof_id, PipelineConfig, ProofPipeline};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

const RESOURCE: &str = "tactical_simulation";

struct World {
    dir: TempDir,
    clock: Arc<ManualClock>,
    backend: Arc<ScriptedBackend>,
    registry: Arc<DidRegistry>,
    issuer: CredentialIssuer,
    verifier: Arc<Verifier>,
    pipeline: Arc<ProofPipeline>,
    gateway: AccessGateway,
}

async fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let circuits = dir.path().join("circuits");
    std::fs::create_dir_all(&circuits).unwrap();
    std::fs::write(circuits.join("access_control.zok"), ACCESS_CONTROL_CIRCUIT).unwrap();

    let clock = Arc::new(ManualClock::default());
    let pool = Arc::new(WorkerPool::new(4, 32));
    let revocations = Arc::new(RevocationList::new());
    let backend = Arc::new(ScriptedBackend::new());

    let registry = Arc::new(
        DidRegistry::open(
            Arc::new(JsonFileDidStore::new(dir.path().join("data/did_documents.json"))),
            pool.clone(),
            clock.clone(),
            Duration::from_secs(300),
            0,
        )
        .await
        .unwrap(),
    );
    let verifier = Arc::new(Verifier::new(revocations.clone(), clock.clone(), Duration::from_secs(60)));
    let pipeline = Arc::new(
        ProofPipeline::new(
            backend.clone(),
            registry.clone(),
            verifier.clone(),
            pool.clone(),
            clock.clone(),
            PipelineConfig {
                circuits_dir: circuits,
                work_dir: dir.path().join("data/zkp"),
                backend_timeout: Duration::from_secs(10),
                artifact_ttl: Duration::from_secs(86_400),
                proof_ttl: Duration::from_secs(3600),
                verification_ttl: Duration::from_secs(60),
            },
        )
        .unwrap(),
    );
    let gateway = AccessGateway::new(
        registry.clone(),
        verifier.clone(),
        pipeline.clone(),
        revocations.clone(),
        clock.clone(),
        Duration::from_secs(5),
    );

    World {
        issuer: CredentialIssuer::new(revocations, pool, clock.clone()),
        dir,
        clock,
        backend,
        registry,
        verifier,
        pipeline,
        gateway,
    }
}

fn operator_attributes() -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("role".into(), json!("operator"));
    attrs.insert("clearance".into(), json!("high"));
    attrs
}

/// Creates D1 (commander) and D2 (operator) and issues D1 → D2.
async fn commander_issues_to_operator(w: &World) -> (String, String, VerifiableCredential) {
    let (d1, _) = w.registry.create_did("commander").await.unwrap();
    let (d2, _) = w.registry.create_did("operator").await.unwrap();
    let key = w.registry.private_key(&d1).await.unwrap().unwrap();
    let vc = w
        .issuer
        .issue_credential(&d2, &d1, "simulation_access", operator_attributes(), &key, 30)
        .await
        .unwrap();
    (d1, d2, vc)
}

#[tokio::test]
async fn credential_round_trip_grants_then_denies_after_revocation() {
    let w = world().await;
    let (_, _, vc) = commander_issues_to_operator(&w).await;
    w.gateway
        .add_access_policy(RESOURCE, AccessPolicy::new(operator_attributes()));

    let request = AccessRequest::with_credential(vc.clone(), RESOURCE, "execute");
    let granted = w.gateway.handle_access_request(&request).await;
    assert!(granted.granted, "{:?}", granted);

    assert!(w.issuer.revoke_credential(&vc.id).await);
    let denied = w.gateway.handle_access_request(&request).await;
    assert!(!denied.granted);
    assert_eq!(denied.reason.as_deref(), Some("credential revoked"));

    let logs = w.gateway.access_logs();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].granted && !logs[1].granted);
}

#[tokio::test]
async fn proof_round_trip_and_fabricated_proof_id() {
    let w = world().await;
    let (_, _, vc) = commander_issues_to_operator(&w).await;
    w.gateway
        .add_access_policy(RESOURCE, AccessPolicy::new(operator_attributes()));

    let proof = w
        .pipeline
        .generate_proof(&vc, "access_control", &operator_attributes())
        .await
        .unwrap();
    let granted = w
        .gateway
        .handle_access_request(&AccessRequest::with_proof(&proof.proof_id, RESOURCE, "execute"))
        .await;
    assert!(granted.granted, "{:?}", granted);

    let denied = w
        .gateway
        .handle_access_request(&AccessRequest::with_proof("zkp1-deadbeef", RESOURCE, "execute"))
        .await;
    assert!(!denied.granted);
    assert_eq!(denied.reason.as_deref(), Some("invalid proof id"));
}

#[tokio::test]
async fn unsigned_credential_from_unknown_issuer_gets_no_proof_and_no_access() {
    let w = world().await;
    let (_, _, mut vc) = commander_issues_to_operator(&w).await;
    w.gateway
        .add_access_policy(RESOURCE, AccessPolicy::new(operator_attributes()));
    vc.issuer = "did:lvc:nobody".into();
    vc.proof.signed_token = "forged.forged.forged".into();

    assert!(w
        .pipeline
        .generate_proof(&vc, "access_control", &operator_attributes())
        .await
        .is_err());
    assert_eq!(w.backend.total_calls(), 0);

    let proof_id = derive_proof_id(&vc.id, "access_control", vc.issuance_date).unwrap();
    let denied = w
        .gateway
        .handle_access_request(&AccessRequest::with_proof(&proof_id, RESOURCE, "execute"))
        .await;
    assert!(!denied.granted);
}

#[tokio::test]
async fn proof_access_ends_when_the_issuer_did_is_revoked() {
    let w = world().await;
    let (d1, _, vc) = commander_issues_to_operator(&w).await;
    w.gateway
        .add_access_policy(RESOURCE, AccessPolicy::new(operator_attributes()));
    let proof = w
        .pipeline
        .generate_proof(&vc, "access_control", &operator_attributes())
        .await
        .unwrap();
    let request = AccessRequest::with_proof(&proof.proof_id, RESOURCE, "execute");
    assert!(w.gateway.handle_access_request(&request).await.granted);

    assert_ok!(w.registry.revoke_did(&d1).await);
    let denied = w.gateway.handle_access_request(&request).await;
    assert_eq!(denied.reason.as_deref(), Some("issuer not found"));
}

#[tokio::test]
async fn generate_proof_twice_reuses_the_cached_proof() {
    let w = world().await;
    let (_, _, vc) = commander_issues_to_operator(&w).await;

    let first = w
        .pipeline
        .generate_proof(&vc, "access_control", &operator_attributes())
        .await
        .unwrap();
    let calls = w.backend.total_calls();
    let second = w
        .pipeline
        .generate_proof(&vc, "access_control", &operator_attributes())
        .await
        .unwrap();

    assert_eq!(first.proof_id, second.proof_id);
    assert_eq!(w.backend.total_calls(), calls);
}

#[tokio::test]
async fn no_policy_denies_any_request_shape() {
    let w = world().await;
    let (_, _, vc) = commander_issues_to_operator(&w).await;

    for request in [
        AccessRequest::with_credential(vc, "unregistered", "execute"),
        AccessRequest::with_proof("zkp1-00", "unregistered", "observe"),
    ] {
        let response = w.gateway.handle_access_request(&request).await;
        assert!(!response.granted);
        assert_eq!(response.reason.as_deref(), Some("no policy for resource"));
    }
}

#[tokio::test]
async fn verification_fails_after_expiration() {
    let w = world().await;
    let (d1, _, vc) = commander_issues_to_operator(&w).await;
    let issuer_key = w
        .registry
        .resolve_did(&d1)
        .await
        .unwrap()
        .unwrap()
        .public_key_bytes()
        .unwrap()
        .unwrap();

    assert!(w.verifier.verify_credential(&vc, &issuer_key));
    w.clock.set(vc.expiration_date + chrono::Duration::seconds(1));
    assert!(!w.verifier.verify_credential(&vc, &issuer_key));
    assert!(w.clock.now() > vc.expiration_date);
}

#[tokio::test]
async fn dids_survive_a_registry_restart() {
    let w = world().await;
    let (d1, d2, _) = commander_issues_to_operator(&w).await;
    assert_ok!(w.registry.revoke_did(&d2).await);

    let reopened = DidRegistry::open(
        Arc::new(JsonFileDidStore::new(w.dir.path().join("data/did_documents.json"))),
        Arc::new(WorkerPool::new(1, 4)),
        w.clock.clone(),
        Duration::from_secs(300),
        0,
    )
    .await
    .unwrap();
    assert_eq!(reopened.list_dids().await, vec![d1.clone()]);
    assert!(reopened.resolve_did(&d2).await.unwrap().is_none());
    assert_eq!(
        reopened.public_document(&d1).await.unwrap().unwrap().participant_type,
        "commander"
    );
}
