// src/main.rs

//! # Trust Engine Walkthrough
//!
//! Wires the four components from [`Settings`] and runs the commander/operator
//! scenario end to end:
//!
//! 1. Create a commander and an operator DID
//! 2. Issue a `simulation_access` credential from commander to operator
//! 3. Register a policy on `tactical_simulation`
//! 4. Request access with the disclosed credential
//! 5. Request access with a zero-knowledge proof (needs the proving backend)
//!
//! The access log is printed as JSON at the end.
//!
//! ## Environment
//! - `LVC_TRUST__*`: overrides any setting, e.g. `LVC_TRUST__BACKEND_BINARY`
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use lvc_trust::config::Settings;
use lvc_trust::models::access::{AccessPolicy, AccessRequest};
use lvc_trust::models::credential::Attributes;
use lvc_trust::services::credential_issuer::{CredentialIssuer, RevocationList};
use lvc_trust::services::did_registry::DidRegistry;
use lvc_trust::services::gateway::AccessGateway;
use lvc_trust::services::verifier::Verifier;
use lvc_trust::storage::did_store::JsonFileDidStore;
use lvc_trust::utils::clock::{Clock, SystemClock};
use lvc_trust::utils::worker_pool::WorkerPool;
use lvc_trust::zkp::{PipelineConfig, ProofPipeline, ZokratesBackend};
use serde_json::json;
use std::sync::Arc;

const RESOURCE: &str = "tactical_simulation";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("loading settings")?;
    info!("data directory: {}", settings.data_dir.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool = Arc::new(WorkerPool::new(settings.worker_threads, settings.max_queued_jobs));
    let revocations = Arc::new(RevocationList::new());

    let registry = Arc::new(
        DidRegistry::open(
            Arc::new(JsonFileDidStore::new(&settings.did_store_path)),
            pool.clone(),
            clock.clone(),
            settings.did_cache_ttl(),
            settings.storage_retries,
        )
        .await
        .context("opening DID registry")?,
    );
    let issuer = CredentialIssuer::new(revocations.clone(), pool.clone(), clock.clone());
    let verifier = Arc::new(Verifier::new(
        revocations.clone(),
        clock.clone(),
        settings.verification_cache_ttl(),
    ));
    let pipeline = Arc::new(
        ProofPipeline::new(
            Arc::new(ZokratesBackend::new(&settings.backend_binary)),
            registry.clone(),
            verifier.clone(),
            pool.clone(),
            clock.clone(),
            PipelineConfig::from_settings(&settings),
        )
        .context("creating proof pipeline")?,
    );
    let gateway = AccessGateway::new(
        registry.clone(),
        verifier,
        pipeline.clone(),
        revocations,
        clock,
        settings.decision_cache_ttl(),
    );

    let (commander, _) = registry.create_did("commander").await?;
    let (operator, _) = registry.create_did("operator").await?;
    info!("commander {}, operator {}", commander, operator);

    let mut attributes = Attributes::new();
    attributes.insert("role".into(), json!("operator"));
    attributes.insert("clearance".into(), json!("high"));

    let commander_key = registry
        .private_key(&commander)
        .await?
        .context("commander DID has no private key")?;
    let credential = issuer
        .issue_credential(
            &operator,
            &commander,
            "simulation_access",
            attributes.clone(),
            &commander_key,
            settings.default_validity_days,
        )
        .await?;

    gateway.add_access_policy(RESOURCE, AccessPolicy::new(attributes.clone()));

    let response = gateway
        .handle_access_request(&AccessRequest::with_credential(credential.clone(), RESOURCE, "execute"))
        .await;
    info!("credential request: granted={} ({:?})", response.granted, response.reason);

    match pipeline.generate_proof(&credential, "access_control", &attributes).await {
        Ok(proof) => {
            let response = gateway
                .handle_access_request(&AccessRequest::with_proof(&proof.proof_id, RESOURCE, "execute"))
                .await;
            info!("proof request: granted={} ({:?})", response.granted, response.reason);
        }
        Err(e) => warn!("skipping proof walkthrough: {}", e),
    }

    issuer.revoke_credential(&credential.id).await;
    let response = gateway
        .handle_access_request(&AccessRequest::with_credential(credential, RESOURCE, "execute"))
        .await;
    info!("after revocation: granted={} ({:?})", response.granted, response.reason);

    println!("{}", serde_json::to_string_pretty(&gateway.access_logs())?);
    Ok(())
}
