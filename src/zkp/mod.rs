// src/zkp/mod.rs
pub mod backend;
pub mod proof_generation;
pub mod proof_verification;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod witness;

pub use backend::{ProvingBackend, ZokratesBackend};
pub use proof_generation::{derive_proof_id, PipelineConfig, ProofPipeline};
