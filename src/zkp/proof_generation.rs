// src/zkp/proof_generation.rs
//! Zero-knowledge proof generation.
//!
//! [`ProofPipeline`] fronts a [`ProvingBackend`] and adds caching, idempotence
//! and concurrency discipline around its five operations:
//!
//! 1. **Compile**: once per circuit source, keyed by the SHA-256 of the `.zok` file
//! 2. **Setup**: once per compiled circuit, same key
//! 3. **Witness**: once per full input set, keyed by a digest of the encoded arguments
//! 4. **Prove**: once per proof id, derived from (credential id, proof type, issuance date)
//!
//! Only credentials that verify against their issuer's registered DID are
//! proven; a forged or revoked credential never reaches the backend.
//!
//! Artifacts live under `<work_dir>/<proof_type>/<circuit hash>/` and are
//! written to a `.partial` file first, so a cancelled stage never leaves a file
//! a later call would mistake for a finished artifact.
//!
//! ## Concurrency
//! Compile, setup and witness stages of one circuit are serialized per artifact
//! kind with a keyed lock; different circuits never contend. Generation of one
//! proof id is serialized too, so concurrent identical requests drive the
//! backend once. Every backend call runs on the shared worker pool under the
//! configured timeout.

use crate::config::Settings;
use crate::error::{Result, TrustError};
use crate::models::credential::{Attributes, VerifiableCredential};
use crate::models::proof::{Proof, ProofMetadata};
use crate::services::did_registry::DidRegistry;
use crate::services::verifier::Verifier;
use crate::utils::cache::TtlCache;
use crate::utils::clock::Clock;
use crate::utils::crypto::{hkdf_sha256, sha256_hex, to_hex};
use crate::utils::locks::KeyedLocks;
use crate::utils::worker_pool::WorkerPool;
use crate::zkp::backend::ProvingBackend;
use crate::zkp::witness::{credential_public_inputs, encode_inputs, ENCODING_VERSION};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// HKDF info string of proof id scheme v1
pub const PROOF_ID_INFO: &[u8] = b"lvc-proof-id/v1";

pub const PROOF_ID_PREFIX: &str = "zkp1-";

const PROOF_ID_BYTES: usize = 16;

/// Derives the deterministic proof id.
///
/// Scheme v1: HKDF-SHA256 with an empty salt over
/// `"<credential_id>:<proof_type>:<issuance_date>"` (RFC 3339, UTC, `Z` suffix),
/// info [`PROOF_ID_INFO`], 16 bytes of output rendered as `zkp1-<hex>`.
pub fn derive_proof_id(credential_id: &str, proof_type: &str, issuance_date: DateTime<Utc>) -> Result<String> {
    let material = format!(
        "{}:{}:{}",
        credential_id,
        proof_type,
        issuance_date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    );
    let okm = hkdf_sha256(material.as_bytes(), PROOF_ID_INFO, PROOF_ID_BYTES)?;
    Ok(format!("{}{}", PROOF_ID_PREFIX, to_hex(&okm)))
}

/// Paths, timeout and cache lifetimes of a [`ProofPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub circuits_dir: PathBuf,
    pub work_dir: PathBuf,
    pub backend_timeout: Duration,
    /// Lifetime of compiled/setup/witness references
    pub artifact_ttl: Duration,
    pub proof_ttl: Duration,
    pub verification_ttl: Duration,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            circuits_dir: settings.circuits_dir.clone(),
            work_dir: settings.work_dir.clone(),
            backend_timeout: settings.backend_timeout(),
            artifact_ttl: settings.artifact_cache_ttl(),
            proof_ttl: settings.proof_cache_ttl(),
            verification_ttl: settings.verification_cache_ttl(),
        }
    }
}

/// A compiled circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitRef {
    pub name: String,
    /// SHA-256 of the circuit source
    pub circuit_hash: String,
    pub source: PathBuf,
    /// Artifact directory of this circuit version
    pub dir: PathBuf,
    pub program: PathBuf,
}

/// Keys produced by the trusted setup of one compiled circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupRef {
    pub circuit_hash: String,
    pub proving_key: PathBuf,
    pub verification_key: PathBuf,
}

/// A computed witness and the encoded arguments it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct WitnessRef {
    pub path: PathBuf,
    pub inputs_hash: String,
    pub public_inputs: Vec<String>,
    pub private_inputs: Vec<String>,
}

pub struct ProofPipeline {
    pub(super) backend: Arc<dyn ProvingBackend>,
    registry: Arc<DidRegistry>,
    verifier: Arc<Verifier>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    circuits_dir: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    circuit_locks: KeyedLocks,
    proof_locks: KeyedLocks,
    compiled: TtlCache<String, CircuitRef>,
    setups: TtlCache<String, SetupRef>,
    witnesses: TtlCache<String, WitnessRef>,
    proofs: TtlCache<String, Proof>,
    pub(super) verifications: TtlCache<String, bool>,
}

impl ProofPipeline {
    /// Creates a pipeline.
    ///
    /// `registry` and `verifier` authenticate every credential before it is
    /// proven. Relative directories are resolved against the current directory,
    /// since the backend runs with its working directory inside the artifact tree.
    pub fn new(
        backend: Arc<dyn ProvingBackend>,
        registry: Arc<DidRegistry>,
        verifier: Arc<Verifier>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            registry,
            verifier,
            pool,
            circuits_dir: absolute(&config.circuits_dir)?,
            work_dir: absolute(&config.work_dir)?,
            timeout: config.backend_timeout,
            circuit_locks: KeyedLocks::new(),
            proof_locks: KeyedLocks::new(),
            compiled: TtlCache::new(config.artifact_ttl, clock.clone()),
            setups: TtlCache::new(config.artifact_ttl, clock.clone()),
            witnesses: TtlCache::new(config.artifact_ttl, clock.clone()),
            proofs: TtlCache::new(config.proof_ttl, clock.clone()),
            verifications: TtlCache::new(config.verification_ttl, clock.clone()),
            clock,
        })
    }

    /// Location of the circuit source for `proof_type`.
    ///
    /// # Errors
    /// `InvalidInput` unless the name is non-empty ASCII alphanumerics, `_` or `-`
    pub fn circuit_path(&self, proof_type: &str) -> Result<PathBuf> {
        let valid = !proof_type.is_empty()
            && proof_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(TrustError::InvalidInput(format!("invalid proof type '{}'", proof_type)));
        }
        Ok(self.circuits_dir.join(format!("{}.zok", proof_type)))
    }

    /// Returns a previously generated proof that is still cached.
    pub fn cached_proof(&self, proof_id: &str) -> Option<Proof> {
        self.proofs.get(&proof_id.to_string())
    }

    /// Compiles the circuit for `proof_type`, reusing any compilation of the
    /// same source.
    ///
    /// # Errors
    /// - `NotFound` if `<circuits_dir>/<proof_type>.zok` does not exist
    /// - `Timeout` / `ExternalProcessFailure` from the backend
    pub async fn compile_circuit(&self, proof_type: &str) -> Result<CircuitRef> {
        let source = self.circuit_path(proof_type)?;
        let contents = match tokio::fs::read(&source).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrustError::not_found("circuit", proof_type))
            }
            Err(e) => return Err(e.into()),
        };
        let circuit_hash = sha256_hex(&contents);
        let key = format!("{}:{}", proof_type, circuit_hash);
        if let Some(circuit) = self.compiled.get(&key) {
            return Ok(circuit);
        }

        let _guard = self.circuit_locks.lock(&format!("{}/compile", proof_type)).await;
        self.compile_locked(proof_type, source, circuit_hash, key).await
    }

    async fn compile_locked(
        &self,
        proof_type: &str,
        source: PathBuf,
        circuit_hash: String,
        key: String,
    ) -> Result<CircuitRef> {
        // Another caller may have finished while we waited for the lock.
        if let Some(circuit) = self.compiled.get(&key) {
            return Ok(circuit);
        }

        let dir = self.work_dir.join(proof_type).join(&circuit_hash[..16]);
        let circuit = CircuitRef {
            name: proof_type.to_string(),
            program: dir.join("program"),
            circuit_hash,
            source,
            dir,
        };

        if exists(&circuit.program).await {
            debug!("reusing compiled program {}", circuit.program.display());
        } else {
            tokio::fs::create_dir_all(&circuit.dir).await?;
            let partial = circuit.dir.join("program.partial");
            self.stage("compile", self.backend.compile(&circuit.source, &partial))
                .await?;
            tokio::fs::rename(&partial, &circuit.program).await?;
            info!("compiled circuit {} ({})", proof_type, &circuit.circuit_hash[..12]);
        }

        self.compiled.insert(key, circuit.clone());
        Ok(circuit)
    }

    /// Runs (or reuses) the trusted setup of a compiled circuit.
    pub async fn setup_circuit(&self, circuit: &CircuitRef) -> Result<SetupRef> {
        let key = format!("{}:{}", circuit.name, circuit.circuit_hash);
        if let Some(setup) = self.setups.get(&key) {
            return Ok(setup);
        }

        let _guard = self.circuit_locks.lock(&format!("{}/setup", circuit.name)).await;
        self.setup_locked(circuit, key).await
    }

    async fn setup_locked(&self, circuit: &CircuitRef, key: String) -> Result<SetupRef> {
        if let Some(setup) = self.setups.get(&key) {
            return Ok(setup);
        }

        let setup = SetupRef {
            circuit_hash: circuit.circuit_hash.clone(),
            proving_key: circuit.dir.join("proving.key"),
            verification_key: circuit.dir.join("verification.key"),
        };

        if exists(&setup.proving_key).await && exists(&setup.verification_key).await {
            debug!("reusing setup keys for {}", circuit.name);
        } else {
            let pk_partial = circuit.dir.join("proving.key.partial");
            let vk_partial = circuit.dir.join("verification.key.partial");
            self.stage(
                "setup",
                self.backend.setup(&circuit.program, &pk_partial, &vk_partial),
            )
            .await?;
            tokio::fs::rename(&pk_partial, &setup.proving_key).await?;
            tokio::fs::rename(&vk_partial, &setup.verification_key).await?;
            info!("completed trusted setup for {}", circuit.name);
        }

        self.setups.insert(key, setup.clone());
        Ok(setup)
    }

    /// Encodes `public_inputs` then `private_inputs` (each in key order) and
    /// computes the witness, reusing any witness of the identical argument list.
    ///
    /// # Errors
    /// `InvalidInput` for values the encoding cannot represent, plus backend failures
    pub async fn compute_witness(
        &self,
        circuit: &CircuitRef,
        public_inputs: &Attributes,
        private_inputs: &Attributes,
    ) -> Result<WitnessRef> {
        let public = encode_inputs(public_inputs)?;
        let private = encode_inputs(private_inputs)?;
        let inputs_hash = sha256_hex(
            format!(
                "v{}|{}|{}|{}",
                ENCODING_VERSION,
                circuit.circuit_hash,
                public.join(","),
                private.join(",")
            )
            .as_bytes(),
        );
        if let Some(witness) = self.witnesses.get(&inputs_hash) {
            return Ok(witness);
        }

        let _guard = self.circuit_locks.lock(&format!("{}/witness", circuit.name)).await;
        self.compute_witness_locked(
            circuit,
            WitnessRef {
                path: circuit.dir.join("witnesses").join(&inputs_hash[..32]),
                inputs_hash,
                public_inputs: public,
                private_inputs: private,
            },
        )
        .await
    }

    async fn compute_witness_locked(&self, circuit: &CircuitRef, witness: WitnessRef) -> Result<WitnessRef> {
        if let Some(cached) = self.witnesses.get(&witness.inputs_hash) {
            return Ok(cached);
        }

        if exists(&witness.path).await {
            debug!("reusing witness {}", witness.path.display());
        } else {
            let dir = circuit.dir.join("witnesses");
            tokio::fs::create_dir_all(&dir).await?;
            let partial = witness.path.with_extension("partial");
            let args: Vec<String> = witness
                .public_inputs
                .iter()
                .chain(witness.private_inputs.iter())
                .cloned()
                .collect();
            self.stage(
                "compute-witness",
                self.backend.compute_witness(&circuit.program, &args, &partial),
            )
            .await?;
            tokio::fs::rename(&partial, &witness.path).await?;
            debug!("computed witness {} for {}", &witness.inputs_hash[..12], circuit.name);
        }

        self.witnesses.insert(witness.inputs_hash.clone(), witness.clone());
        Ok(witness)
    }

    /// Generates a proof about `credential` for the circuit `proof_type`.
    ///
    /// Idempotent: while the proof id is cached the cached proof is returned and
    /// the backend is not invoked.
    ///
    /// # Arguments
    /// * `credential` - Source of the credential-bound public inputs
    /// * `proof_type` - Circuit name, e.g. "access_control"
    /// * `private_inputs` - Hidden inputs, e.g. `{role, clearance}`
    ///
    /// # Errors
    /// - `NotFound` (kind `"issuer"`) if the issuer DID is unknown or revoked
    /// - `InvalidSignature`, `Expired` or `Revoked` if the credential does not
    ///   verify; the backend is not invoked
    /// - `InvalidInput` if a private input contradicts the credential's attribute
    ///   of the same name, or cannot be encoded
    /// - `NotFound` for an unknown circuit
    /// - `Timeout` / `ExternalProcessFailure` from any stage; not retried
    pub async fn generate_proof(
        &self,
        credential: &VerifiableCredential,
        proof_type: &str,
        private_inputs: &Attributes,
    ) -> Result<Proof> {
        // The id only covers (id, type, issuance date), so a cache hit must not
        // be handed to a credential that merely copies those fields.
        self.verifier
            .verify_against_registry(credential, &self.registry)
            .await?;

        let proof_id = derive_proof_id(&credential.id, proof_type, credential.issuance_date)?;
        if let Some(proof) = self.proofs.get(&proof_id) {
            debug!("proof cache hit for {}", proof_id);
            return Ok(proof);
        }

        let _guard = self.proof_locks.lock(&proof_id).await;
        if let Some(proof) = self.proofs.get(&proof_id) {
            debug!("proof {} generated while waiting", proof_id);
            return Ok(proof);
        }

        for (name, value) in private_inputs {
            if let Some(asserted) = credential.attribute(name) {
                if asserted != value {
                    return Err(TrustError::InvalidInput(format!(
                        "private input '{}' contradicts the credential",
                        name
                    )));
                }
            }
        }

        let circuit = self.compile_circuit(proof_type).await?;
        let public_inputs = credential_public_inputs(credential);

        // Setup and witness only depend on the compiled program. If either
        // fails the other is dropped, which kills its backend process.
        let (setup, witness) = tokio::try_join!(
            self.setup_circuit(&circuit),
            self.compute_witness(&circuit, &public_inputs, private_inputs)
        )?;

        let proofs_dir = circuit.dir.join("proofs");
        tokio::fs::create_dir_all(&proofs_dir).await?;
        let proof_path = proofs_dir.join(format!("{}.json", proof_id));
        let blob = self
            .stage(
                "generate-proof",
                self.backend.generate_proof(
                    &circuit.program,
                    &witness.path,
                    &setup.proving_key,
                    &proof_path,
                ),
            )
            .await?;

        let proof = Proof {
            proof_id: proof_id.clone(),
            proof_type: proof_type.to_string(),
            credential_id: credential.id.clone(),
            blob,
            metadata: ProofMetadata {
                generated_at: self.clock.now(),
                issuer: credential.issuer.clone(),
                expiration_date: credential.expiration_date,
                proof_type: proof_type.to_string(),
                circuit_hash: circuit.circuit_hash.clone(),
                scheme_version: ENCODING_VERSION,
                public_inputs: witness.public_inputs.clone(),
                disclosed_inputs: private_inputs.keys().cloned().collect(),
            },
        };
        self.proofs.insert(proof_id.clone(), proof.clone());
        info!(
            "generated {} proof {} for credential {}",
            proof_type, proof_id, credential.id
        );
        Ok(proof)
    }

    /// Runs one backend call on the worker pool under the timeout.
    pub(super) async fn stage<T, F>(&self, name: &str, job: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, self.pool.run(job)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} exceeded {:?}, abandoning it", name, self.timeout);
                Err(TrustError::Timeout {
                    stage: name.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::credential_issuer::{CredentialIssuer, RevocationList};
    use crate::storage::did_store::MemoryDidStore;
    use crate::utils::clock::ManualClock;
    use crate::zkp::scripted::{ScriptedBackend, ACCESS_CONTROL_CIRCUIT};
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) struct Harness {
        pub dir: TempDir,
        pub backend: Arc<ScriptedBackend>,
        pub pipeline: ProofPipeline,
        pub clock: Arc<ManualClock>,
        pub registry: Arc<DidRegistry>,
        pub revocations: Arc<RevocationList>,
        pub verifier: Arc<Verifier>,
        pub issuer: CredentialIssuer,
        /// Registered DID that signs the harness credentials
        pub commander: String,
    }

    pub(crate) async fn harness_with_timeout(timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let circuits = dir.path().join("circuits");
        std::fs::create_dir_all(&circuits).unwrap();
        std::fs::write(circuits.join("access_control.zok"), ACCESS_CONTROL_CIRCUIT).unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        let clock = Arc::new(ManualClock::default());
        let pool = Arc::new(WorkerPool::new(4, 16));
        let registry = Arc::new(
            DidRegistry::open(
                Arc::new(MemoryDidStore::new()),
                pool.clone(),
                clock.clone(),
                Duration::from_secs(300),
                0,
            )
            .await
            .unwrap(),
        );
        let revocations = Arc::new(RevocationList::new());
        let verifier = Arc::new(Verifier::new(revocations.clone(), clock.clone(), Duration::from_secs(60)));
        let pipeline = ProofPipeline::new(
            backend.clone(),
            registry.clone(),
            verifier.clone(),
            pool.clone(),
            clock.clone(),
            PipelineConfig {
                circuits_dir: circuits,
                work_dir: dir.path().join("work"),
                backend_timeout: timeout,
                artifact_ttl: Duration::from_secs(3600),
                proof_ttl: Duration::from_secs(3600),
                verification_ttl: Duration::from_secs(60),
            },
        )
        .unwrap();
        let (commander, _) = registry.create_did("commander").await.unwrap();
        Harness {
            dir,
            backend,
            pipeline,
            issuer: CredentialIssuer::new(revocations.clone(), pool.clone(), clock.clone()),
            clock,
            registry,
            revocations,
            verifier,
            commander,
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with_timeout(Duration::from_secs(5)).await
    }

    pub(crate) fn operator_inputs() -> Attributes {
        let mut inputs = Attributes::new();
        inputs.insert("role".into(), json!("operator"));
        inputs.insert("clearance".into(), json!("high"));
        inputs
    }

    /// Issues a 30-day operator credential signed by the harness commander.
    pub(crate) async fn credential(h: &Harness) -> VerifiableCredential {
        issue_for(h, "did:lvc:operator", operator_inputs(), 30).await
    }

    pub(crate) async fn issue_for(
        h: &Harness,
        subject: &str,
        attributes: Attributes,
        validity_days: i64,
    ) -> VerifiableCredential {
        let key = h.registry.private_key(&h.commander).await.unwrap().unwrap();
        h.issuer
            .issue_credential(
                subject,
                &h.commander,
                "simulation_access",
                attributes,
                &key,
                validity_days,
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_proof_id_is_deterministic_and_versioned() {
        let issued = Utc::now();
        let a = derive_proof_id("urn:vc:1", "access_control", issued).unwrap();
        let b = derive_proof_id("urn:vc:1", "access_control", issued).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(PROOF_ID_PREFIX));
        assert_eq!(a.len(), PROOF_ID_PREFIX.len() + 2 * PROOF_ID_BYTES);

        assert_ne!(a, derive_proof_id("urn:vc:2", "access_control", issued).unwrap());
        assert_ne!(a, derive_proof_id("urn:vc:1", "other", issued).unwrap());
        assert_ne!(
            a,
            derive_proof_id("urn:vc:1", "access_control", issued + chrono::Duration::seconds(1)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_generate_is_idempotent_without_backend_calls() {
        let h = harness().await;
        let vc = credential(&h).await;

        let first = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap();
        let calls = h.backend.total_calls();
        assert_eq!(h.backend.calls("generate-proof"), 1);

        let second = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap();
        assert_eq!(first.proof_id, second.proof_id);
        assert_eq!(h.backend.total_calls(), calls);
        assert_eq!(h.pipeline.cached_proof(&first.proof_id), Some(first));
    }

    #[tokio::test]
    async fn test_concurrent_generation_drives_backend_once() {
        let h = harness().await;
        let vc = credential(&h).await;
        let inputs = operator_inputs();

        let (a, b) = tokio::join!(
            h.pipeline.generate_proof(&vc, "access_control", &inputs),
            h.pipeline.generate_proof(&vc, "access_control", &inputs)
        );
        assert_eq!(a.unwrap().proof_id, b.unwrap().proof_id);
        assert_eq!(h.backend.calls("compile"), 1);
        assert_eq!(h.backend.calls("generate-proof"), 1);
    }

    #[tokio::test]
    async fn test_metadata_records_inputs() {
        let h = harness().await;
        let vc = credential(&h).await;
        let proof = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap();

        assert_eq!(proof.credential_id, vc.id);
        assert_eq!(proof.metadata.scheme_version, ENCODING_VERSION);
        assert_eq!(proof.metadata.public_inputs.len(), 4);
        assert_eq!(proof.metadata.disclosed_inputs, vec!["clearance", "role"]);
        assert_eq!(proof.metadata.generated_at, h.clock.now());
        assert_eq!(proof.metadata.issuer, h.commander);
        assert_eq!(proof.metadata.expiration_date, vc.expiration_date);
    }

    #[tokio::test]
    async fn test_compiled_artifacts_are_reused_across_credentials() {
        let h = harness().await;
        let a = credential(&h).await;
        let b = credential(&h).await;
        h.pipeline.generate_proof(&a, "access_control", &operator_inputs()).await.unwrap();
        h.pipeline.generate_proof(&b, "access_control", &operator_inputs()).await.unwrap();

        assert_eq!(h.backend.calls("compile"), 1);
        assert_eq!(h.backend.calls("setup"), 1);
        assert_eq!(h.backend.calls("compute-witness"), 2);
        assert_eq!(h.backend.calls("generate-proof"), 2);
    }

    #[tokio::test]
    async fn test_changed_source_is_recompiled() {
        let h = harness().await;
        let circuit = h.pipeline.compile_circuit("access_control").await.unwrap();
        std::fs::write(&circuit.source, format!("{}\n// v2\n", ACCESS_CONTROL_CIRCUIT)).unwrap();

        let recompiled = h.pipeline.compile_circuit("access_control").await.unwrap();
        assert_ne!(circuit.circuit_hash, recompiled.circuit_hash);
        assert_eq!(h.backend.calls("compile"), 2);
        assert!(recompiled.program.exists());
    }

    #[tokio::test]
    async fn test_missing_circuit_is_not_found() {
        let h = harness().await;
        let vc = credential(&h).await;
        let err = h.pipeline.generate_proof(&vc, "unknown_circuit", &operator_inputs()).await.unwrap_err();
        assert!(matches!(err, TrustError::NotFound { kind: "circuit", .. }));
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_circuit_name_is_rejected() {
        let h = harness().await;
        let err = h.pipeline.compile_circuit("../secrets").await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unregistered_issuer_and_forged_token_are_not_proven() {
        let h = harness().await;
        let mut vc = credential(&h).await;
        vc.issuer = "did:lvc:nobody".into();
        vc.proof.signed_token = "forged.forged.forged".into();

        let err = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap_err();
        assert!(matches!(err, TrustError::NotFound { kind: "issuer", .. }));
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_self_asserted_attributes_are_not_proven() {
        let h = harness().await;
        let genuine = credential(&h).await;
        h.pipeline.generate_proof(&genuine, "access_control", &operator_inputs()).await.unwrap();
        let calls = h.backend.total_calls();

        // Same id and issuance date, so the same proof id, but altered content.
        let mut forged = genuine.clone();
        forged
            .credential_subject
            .attributes
            .insert("role".into(), json!("commander"));
        let mut inputs = operator_inputs();
        inputs.insert("role".into(), json!("commander"));

        let err = h.pipeline.generate_proof(&forged, "access_control", &inputs).await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidSignature(_)));
        assert_eq!(h.backend.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_revoked_or_expired_credential_is_not_proven() {
        let h = harness().await;
        let revoked = credential(&h).await;
        assert!(h.issuer.revoke_credential(&revoked.id).await);
        let err = h.pipeline.generate_proof(&revoked, "access_control", &operator_inputs()).await.unwrap_err();
        assert!(matches!(err, TrustError::Revoked(_)));

        let short = issue_for(&h, "did:lvc:operator", operator_inputs(), 1).await;
        h.clock.advance(chrono::Duration::days(2));
        let err = h.pipeline.generate_proof(&short, "access_control", &operator_inputs()).await.unwrap_err();
        assert!(matches!(err, TrustError::Expired(_)));
        assert_eq!(h.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_contradicting_private_input_is_rejected() {
        let h = harness().await;
        let vc = credential(&h).await;
        let mut inputs = operator_inputs();
        inputs.insert("clearance".into(), json!("top_secret"));
        let err = h.pipeline.generate_proof(&vc, "access_control", &inputs).await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_backend_failure_is_surfaced_and_not_cached() {
        let h = harness().await;
        let vc = credential(&h).await;
        h.backend.fail("generate-proof", 2);

        let err = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap_err();
        assert!(matches!(
            err,
            TrustError::ExternalProcessFailure { code: Some(2), .. }
        ));

        h.backend.reset("generate-proof");
        let proof = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await;
        assert!(proof.is_ok());
        assert_eq!(h.backend.calls("generate-proof"), 2);
    }

    #[tokio::test]
    async fn test_hung_stage_times_out() {
        let h = harness_with_timeout(Duration::from_millis(100)).await;
        let vc = credential(&h).await;
        h.backend.hang("compile");

        let err = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap_err();
        match err {
            TrustError::Timeout { stage, .. } => assert_eq!(stage, "compile"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.backend.abandoned(), 1);
    }

    #[tokio::test]
    async fn test_failed_setup_cancels_witness_sibling() {
        let h = harness_with_timeout(Duration::from_secs(30)).await;
        let vc = credential(&h).await;
        h.backend.hang("compute-witness");
        h.backend.fail_after("setup", 1, Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = h.pipeline.generate_proof(&vc, "access_control", &operator_inputs()).await.unwrap_err();
        assert!(matches!(err, TrustError::ExternalProcessFailure { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.backend.abandoned(), 1);

        let stray = std::fs::read_dir(h.dir.path().join("work/access_control"))
            .unwrap()
            .flat_map(|d| std::fs::read_dir(d.unwrap().path()).unwrap())
            .any(|f| f.unwrap().path().ends_with("verification.key"));
        assert!(!stray);
    }
}
