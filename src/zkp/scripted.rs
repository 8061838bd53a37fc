// src/zkp/scripted.rs
//! In-process [`ProvingBackend`] double.
//!
//! Writes placeholder artifacts where the real backend would, counts every
//! invocation and can be told to fail or hang per operation. Its "proofs" carry
//! every witness argument as a public input, which is what circuits that
//! disclose all private inputs (like `access_control.zok`) produce; `verify`
//! accepts exactly when the presented inputs equal those.

use crate::error::{Result, TrustError};
use crate::utils::crypto::sha256_hex;
use crate::zkp::backend::ProvingBackend;
use crate::zkp::witness::to_field_hex;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Source of the default access-control circuit.
pub const ACCESS_CONTROL_CIRCUIT: &str = include_str!("../../circuits/access_control.zok");

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail(i32),
    Hang,
}

#[derive(Debug, Clone, Copy)]
struct Behaviour {
    outcome: Outcome,
    delay: Duration,
}

/// Counts a hung call that was dropped before finishing.
struct Abandon<'a>(&'a AtomicUsize);

impl Drop for Abandon<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    calls: Mutex<HashMap<String, usize>>,
    abandoned: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` exit with `code`.
    pub fn fail(&self, operation: &str, code: i32) {
        self.fail_after(operation, code, Duration::ZERO);
    }

    /// Makes `operation` exit with `code` after `delay`.
    pub fn fail_after(&self, operation: &str, code: i32, delay: Duration) {
        self.set(operation, Outcome::Fail(code), delay);
    }

    /// Makes `operation` never finish.
    pub fn hang(&self, operation: &str) {
        self.set(operation, Outcome::Hang, Duration::ZERO);
    }

    /// Restores normal behaviour of `operation`.
    pub fn reset(&self, operation: &str) {
        self.set(operation, Outcome::Succeed, Duration::ZERO);
    }

    /// Invocations of `operation` so far, including failed ones.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Hung calls that were cancelled.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn set(&self, operation: &str, outcome: Outcome, delay: Duration) {
        self.behaviours
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation.to_string(), Behaviour { outcome, delay });
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(operation.to_string())
            .or_insert(0) += 1;
        let behaviour = self
            .behaviours
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation)
            .copied()
            .unwrap_or(Behaviour {
                outcome: Outcome::Succeed,
                delay: Duration::ZERO,
            });

        if !behaviour.delay.is_zero() {
            tokio::time::sleep(behaviour.delay).await;
        }
        match behaviour.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(code) => Err(TrustError::ExternalProcessFailure {
                stage: operation.to_string(),
                code: Some(code),
                stderr: format!("scripted {} failure", operation),
            }),
            Outcome::Hang => {
                let _abandon = Abandon(&self.abandoned);
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ProvingBackend for ScriptedBackend {
    async fn compile(&self, source: &Path, program_out: &Path) -> Result<()> {
        self.enter("compile").await?;
        let source = tokio::fs::read(source).await?;
        tokio::fs::write(program_out, format!("program {}\n", sha256_hex(&source))).await?;
        Ok(())
    }

    async fn setup(&self, program: &Path, proving_key: &Path, verification_key: &Path) -> Result<()> {
        self.enter("setup").await?;
        let program = tokio::fs::read(program).await?;
        let tag = sha256_hex(&program);
        tokio::fs::write(proving_key, format!("pk {}\n", tag)).await?;
        tokio::fs::write(verification_key, format!("vk {}\n", tag)).await?;
        Ok(())
    }

    async fn compute_witness(&self, _program: &Path, args: &[String], witness_out: &Path) -> Result<()> {
        self.enter("compute-witness").await?;
        tokio::fs::write(witness_out, serde_json::to_vec(args)?).await?;
        Ok(())
    }

    async fn generate_proof(
        &self,
        _program: &Path,
        witness: &Path,
        proving_key: &Path,
        proof_out: &Path,
    ) -> Result<Value> {
        self.enter("generate-proof").await?;
        let witness = tokio::fs::read(witness).await?;
        let args: Vec<String> = serde_json::from_slice(&witness)?;
        let key = tokio::fs::read(proving_key).await?;
        let inputs = args
            .iter()
            .map(|arg| to_field_hex(arg))
            .collect::<Result<Vec<_>>>()?;
        let proof = json!({
            "scheme": "scripted",
            "proof": { "digest": sha256_hex(&[key, witness].concat()) },
            "inputs": inputs,
        });
        tokio::fs::write(proof_out, serde_json::to_vec_pretty(&proof)?).await?;
        Ok(proof)
    }

    async fn verify(
        &self,
        _verification_key: &Path,
        proof: &Value,
        public_inputs: &[String],
        _scratch: &Path,
    ) -> Result<bool> {
        self.enter("verify").await?;
        let presented = public_inputs
            .iter()
            .map(|input| to_field_hex(input).map(Value::String))
            .collect::<Result<Vec<_>>>()?;
        Ok(proof.get("inputs") == Some(&Value::Array(presented)))
    }
}
