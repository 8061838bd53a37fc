// src/config.rs
//! Runtime configuration.
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults
//! 2. An optional TOML file (`config/lvc-trust.toml` unless another path is given)
//! 3. Environment variables prefixed `LVC_TRUST__`, e.g. `LVC_TRUST__WORKER_THREADS=8`

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_FILE: &str = "config/lvc-trust";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root directory of durable state
    pub data_dir: PathBuf,
    /// JSON file holding persisted DID documents
    pub did_store_path: PathBuf,
    /// Directory containing `<proof_type>.zok` circuit sources
    pub circuits_dir: PathBuf,
    /// Shared working area for compiled programs, keys, witnesses and proofs
    pub work_dir: PathBuf,
    /// Executable of the external proving backend
    pub backend_binary: String,
    pub backend_timeout_secs: u64,
    pub worker_threads: usize,
    pub max_queued_jobs: usize,
    pub did_cache_ttl_secs: u64,
    pub verification_cache_ttl_secs: u64,
    pub proof_cache_ttl_secs: u64,
    pub artifact_cache_ttl_secs: u64,
    pub decision_cache_ttl_secs: u64,
    /// Extra attempts for durable writes. Zero means no retries.
    pub storage_retries: u32,
    pub default_validity_days: i64,
}

impl Settings {
    /// Loads settings from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads settings, reading the optional file at `path` (extension may be omitted).
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("data_dir", "data")?
            .set_default("did_store_path", "data/did_documents.json")?
            .set_default("circuits_dir", "circuits")?
            .set_default("work_dir", "data/zkp")?
            .set_default("backend_binary", "zokrates")?
            .set_default("backend_timeout_secs", 120_i64)?
            .set_default("worker_threads", 4_i64)?
            .set_default("max_queued_jobs", 64_i64)?
            .set_default("did_cache_ttl_secs", 300_i64)?
            .set_default("verification_cache_ttl_secs", 60_i64)?
            .set_default("proof_cache_ttl_secs", 3600_i64)?
            .set_default("artifact_cache_ttl_secs", 86_400_i64)?
            .set_default("decision_cache_ttl_secs", 5_i64)?
            .set_default("storage_retries", 0_i64)?
            .set_default("default_validity_days", 365_i64)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LVC_TRUST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn did_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.did_cache_ttl_secs)
    }

    pub fn verification_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_cache_ttl_secs)
    }

    pub fn proof_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.proof_cache_ttl_secs)
    }

    pub fn artifact_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_cache_ttl_secs)
    }

    pub fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_secs)
    }
}
