// src/zkp/backend.rs
//! Boundary to the external zero-knowledge proving backend.
//!
//! The backend is a command-line tool driven through five operations that read
//! and write files in a shared working area:
//!
//! | Operation         | CLI                                                        |
//! |-------------------|------------------------------------------------------------|
//! | `compile`         | `compile -i <src> -o <program>`                            |
//! | `setup`           | `setup -i <program> -p <proving.key> -v <verification.key>`|
//! | `compute-witness` | `compute-witness -i <program> -o <witness> -a <args…>`     |
//! | `generate-proof`  | `generate-proof -i <program> -w <witness> -p <pk> -j <out>`|
//! | `verify`          | `verify -v <verification.key> -j <proof.json>`             |
//!
//! No operation is assumed to be retryable. A non-zero exit is always surfaced
//! as [`TrustError::ExternalProcessFailure`].

use crate::error::{Result, TrustError};
use crate::zkp::witness::to_field_hex;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait ProvingBackend: Send + Sync {
    /// Compiles `source` into the program file `program_out`.
    async fn compile(&self, source: &Path, program_out: &Path) -> Result<()>;

    /// Runs the circuit-specific trusted setup.
    async fn setup(&self, program: &Path, proving_key: &Path, verification_key: &Path) -> Result<()>;

    /// Computes a witness from field-element arguments in circuit order.
    async fn compute_witness(&self, program: &Path, args: &[String], witness_out: &Path) -> Result<()>;

    /// Produces a proof, writing it to `proof_out` and returning its JSON document.
    async fn generate_proof(
        &self,
        program: &Path,
        witness: &Path,
        proving_key: &Path,
        proof_out: &Path,
    ) -> Result<Value>;

    /// Checks `proof` against `public_inputs` (decimal field elements, circuit
    /// order, outputs last). `scratch` is a file path the backend may write.
    ///
    /// Returns `Ok(false)` when the backend rejects the proof.
    async fn verify(
        &self,
        verification_key: &Path,
        proof: &Value,
        public_inputs: &[String],
        scratch: &Path,
    ) -> Result<bool>;
}

/// Drives the ZoKrates CLI.
///
/// Every child is spawned with `kill_on_drop`, so dropping an in-flight call
/// (timeout, failed sibling) terminates the process.
#[derive(Debug, Clone)]
pub struct ZokratesBackend {
    binary: PathBuf,
}

impl ZokratesBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, stage: &str, cwd: &Path, args: Vec<OsString>) -> Result<std::process::Output> {
        debug!("{} {} {:?}", self.binary.display(), stage, args);
        let output = Command::new(&self.binary)
            .arg(stage)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TrustError::ExternalProcessFailure {
                stage: stage.to_string(),
                code: None,
                stderr: format!("could not start {}: {}", self.binary.display(), e),
            })?;
        Ok(output)
    }

    async fn run_checked(&self, stage: &str, cwd: &Path, args: Vec<OsString>) -> Result<std::process::Output> {
        let output = self.run(stage, cwd, args).await?;
        if !output.status.success() {
            return Err(process_failure(stage, &output));
        }
        Ok(output)
    }
}

#[async_trait]
impl ProvingBackend for ZokratesBackend {
    async fn compile(&self, source: &Path, program_out: &Path) -> Result<()> {
        let cwd = parent_dir(program_out)?;
        self.run_checked(
            "compile",
            cwd,
            vec!["-i".into(), source.into(), "-o".into(), program_out.into()],
        )
        .await?;
        Ok(())
    }

    async fn setup(&self, program: &Path, proving_key: &Path, verification_key: &Path) -> Result<()> {
        let cwd = parent_dir(proving_key)?;
        self.run_checked(
            "setup",
            cwd,
            vec![
                "-i".into(),
                program.into(),
                "-p".into(),
                proving_key.into(),
                "-v".into(),
                verification_key.into(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn compute_witness(&self, program: &Path, args: &[String], witness_out: &Path) -> Result<()> {
        let cwd = parent_dir(witness_out)?;
        let mut argv: Vec<OsString> = vec!["-i".into(), program.into(), "-o".into(), witness_out.into()];
        // Circuits without parameters take no `-a` at all.
        if !args.is_empty() {
            argv.push("-a".into());
            argv.extend(args.iter().map(OsString::from));
        }
        self.run_checked("compute-witness", cwd, argv).await?;
        Ok(())
    }

    async fn generate_proof(
        &self,
        program: &Path,
        witness: &Path,
        proving_key: &Path,
        proof_out: &Path,
    ) -> Result<Value> {
        let cwd = parent_dir(proof_out)?;
        self.run_checked(
            "generate-proof",
            cwd,
            vec![
                "-i".into(),
                program.into(),
                "-w".into(),
                witness.into(),
                "-p".into(),
                proving_key.into(),
                "-j".into(),
                proof_out.into(),
            ],
        )
        .await?;
        let bytes = tokio::fs::read(proof_out).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn verify(
        &self,
        verification_key: &Path,
        proof: &Value,
        public_inputs: &[String],
        scratch: &Path,
    ) -> Result<bool> {
        let mut document = proof.clone();
        let inputs = public_inputs
            .iter()
            .map(|input| to_field_hex(input).map(Value::String))
            .collect::<Result<Vec<_>>>()?;
        match document.as_object_mut() {
            Some(object) => {
                object.insert("inputs".to_string(), Value::Array(inputs));
            }
            None => return Err(TrustError::InvalidInput("proof document is not an object".into())),
        }
        tokio::fs::write(scratch, serde_json::to_vec(&document)?).await?;

        let cwd = parent_dir(scratch)?;
        let result = self
            .run(
                "verify",
                cwd,
                vec!["-v".into(), verification_key.into(), "-j".into(), scratch.into()],
            )
            .await;
        if let Err(e) = tokio::fs::remove_file(scratch).await {
            warn!("could not remove {}: {}", scratch.display(), e);
        }
        let output = result?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return Ok(stdout.contains("PASSED"));
        }
        // ZoKrates exits non-zero for a rejected proof; anything else is a fault.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("FAILED") || stderr.contains("FAILED") {
            return Ok(false);
        }
        Err(process_failure("verify", &output))
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| TrustError::InvalidInput(format!("{} has no parent directory", path.display())))
}

fn process_failure(stage: &str, output: &std::process::Output) -> TrustError {
    TrustError::ExternalProcessFailure {
        stage: stage.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}
