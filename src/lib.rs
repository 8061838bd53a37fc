// src/lib.rs
//! # Live Virtual Constructive Trust Engine
//!
//! Identity and access-control core for simulation participants:
//!
//! 1. **DID Registry**: participant identities backed by P-256 key material
//! 2. **Credential Subsystem**: ES256-signed verifiable credentials with revocation
//! 3. **Proof Pipeline**: zero-knowledge proofs over credential attributes via an
//!    external proving backend
//! 4. **Access Gateway**: policy decisions from proofs or disclosed credentials
//!
//! Every component takes its time source, worker pool and cache lifetimes
//! explicitly; there is no global state.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod zkp;

pub use error::{Result, TrustError};
