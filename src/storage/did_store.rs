// src/storage/did_store.rs
//! Durable storage for DID documents.
//!
//! The store is a keyed collection (DID string → document) that is always
//! read and written in full:
//! - [`JsonFileDidStore`]: pretty-printed JSON on disk, replaced atomically
//! - [`MemoryDidStore`]: in-process map for tests, with injectable write failures
//!
//! # Security Considerations
//! - Documents include the controller's private key; the file must be protected
//!   like any other key store

use crate::error::{Result, TrustError};
use crate::models::did::DIDDocument;
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Full snapshot of persisted documents
pub type DidDocuments = BTreeMap<String, DIDDocument>;

#[async_trait]
pub trait DidStore: Send + Sync {
    /// Reads every persisted document.
    async fn load_all(&self) -> Result<DidDocuments>;

    /// Replaces the persisted collection with `documents`.
    async fn save_all(&self, documents: &DidDocuments) -> Result<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileDidStore {
    path: PathBuf,
}

impl JsonFileDidStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DidStore for JsonFileDidStore {
    async fn load_all(&self) -> Result<DidDocuments> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DidDocuments::new()),
            Err(e) => {
                return Err(TrustError::StorageFailure(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if bytes.is_empty() {
            return Ok(DidDocuments::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            TrustError::StorageFailure(format!("parsing {}: {}", self.path.display(), e))
        })
    }

    async fn save_all(&self, documents: &DidDocuments) -> Result<()> {
        let json = serde_json::to_vec_pretty(documents)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            TrustError::StorageFailure(format!("writing {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            TrustError::StorageFailure(format!("replacing {}: {}", self.path.display(), e))
        })?;
        debug!("persisted {} DID document(s) to {}", documents.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store used by tests.
#[derive(Debug, Default)]
pub struct MemoryDidStore {
    documents: Mutex<DidDocuments>,
    failing_writes: AtomicUsize,
    fail_all_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDidStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> DidDocuments {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Seeds the persisted state directly, bypassing any registry.
    pub fn seed(&self, document: DIDDocument) {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(document.id.clone(), document);
    }
}

#[async_trait]
impl DidStore for MemoryDidStore {
    async fn load_all(&self) -> Result<DidDocuments> {
        Ok(self.snapshot())
    }

    async fn save_all(&self, documents: &DidDocuments) -> Result<()> {
        if self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(TrustError::StorageFailure("injected write failure".into()));
        }
        let pending = self.failing_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_writes.store(pending - 1, Ordering::SeqCst);
            return Err(TrustError::StorageFailure("injected write failure".into()));
        }
        *self.documents.lock().unwrap_or_else(|e| e.into_inner()) = documents.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
