// src/services/did_registry.rs
//! DID Registry
//!
//! Creates, persists, caches, resolves and revokes DID documents.
//!
//! Resolution order: TTL cache → in-memory documents → full reload of the
//! durable store. All read-modify-write sequences over the in-memory map and
//! the store run inside one mutual-exclusion domain, so a concurrent resolve
//! sees a document either entirely before or entirely after a revocation.

use crate::error::{Result, TrustError};
use crate::models::did::DIDDocument;
use crate::storage::did_store::{DidDocuments, DidStore};
use crate::utils::cache::TtlCache;
use crate::utils::clock::Clock;
use crate::utils::crypto::generate_keypair;
use crate::utils::worker_pool::WorkerPool;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct RegistryState {
    documents: HashMap<String, Arc<DIDDocument>>,
    /// Grows monotonically; a revoked DID is never reloaded
    revoked: HashSet<String>,
}

impl RegistryState {
    fn snapshot_with(&self, extra: Option<&DIDDocument>, without: Option<&str>) -> DidDocuments {
        let mut docs: DidDocuments = self
            .documents
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != without)
            .map(|(id, doc)| (id.clone(), doc.as_ref().clone()))
            .collect();
        if let Some(doc) = extra {
            docs.insert(doc.id.clone(), doc.clone());
        }
        docs
    }
}

/// Registry of DID documents for simulation participants.
pub struct DidRegistry {
    store: Arc<dyn DidStore>,
    state: Mutex<RegistryState>,
    cache: TtlCache<String, Arc<DIDDocument>>,
    pool: Arc<WorkerPool>,
    storage_retries: u32,
    revocation_epoch: AtomicU64,
}

impl DidRegistry {
    /// Opens the registry, loading every persisted document into memory.
    ///
    /// # Arguments
    /// * `store` - Durable document store
    /// * `pool` - Shared worker pool used for key generation
    /// * `clock` - Time source for the resolution cache
    /// * `cache_ttl` - Lifetime of cached resolutions
    /// * `storage_retries` - Extra attempts for failed writes (0 disables retrying)
    pub async fn open(
        store: Arc<dyn DidStore>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
        storage_retries: u32,
    ) -> Result<Self> {
        let persisted = store.load_all().await?;
        info!("DID registry loaded {} document(s)", persisted.len());
        let documents = persisted
            .into_iter()
            .map(|(id, doc)| (id, Arc::new(doc)))
            .collect();

        Ok(Self {
            store,
            state: Mutex::new(RegistryState {
                documents,
                revoked: HashSet::new(),
            }),
            cache: TtlCache::new(cache_ttl, clock),
            pool,
            storage_retries,
            revocation_epoch: AtomicU64::new(0),
        })
    }

    /// Creates a new DID for a participant.
    ///
    /// Generates a P-256 keypair on the worker pool, derives the DID from the
    /// public key, persists the document and only then publishes it in memory
    /// and in the cache. A persistence failure is returned as an error and the
    /// DID is discarded.
    ///
    /// # Returns
    /// `(did, document)`, the document including the controller's private key
    pub async fn create_did(&self, participant_type: &str) -> Result<(String, DIDDocument)> {
        let keys = self.pool.spawn_blocking(generate_keypair).await?;
        let document = DIDDocument::new(participant_type, &keys.public_key, &keys.private_key);
        let did = document.id.clone();

        let mut state = self.state.lock().await;
        if state.revoked.contains(&did) {
            return Err(TrustError::Revoked(did));
        }
        let snapshot = state.snapshot_with(Some(&document), None);
        self.persist(&snapshot).await?;

        let shared = Arc::new(document.clone());
        state.documents.insert(did.clone(), shared.clone());
        self.cache.insert(did.clone(), shared);
        drop(state);

        info!("created DID {} for participant type '{}'", did, participant_type);
        Ok((did, document))
    }

    /// Resolves a DID to its document.
    ///
    /// # Returns
    /// - `Ok(Some(document))` when found in the cache, in memory or on disk
    /// - `Ok(None)` when the DID is unknown or revoked
    /// - `Err` only when the durable store cannot be read
    pub async fn resolve_did(&self, did: &str) -> Result<Option<DIDDocument>> {
        if let Some(doc) = self.cache.get(&did.to_string()) {
            debug!("DID cache hit for {}", did);
            return Ok(Some(doc.as_ref().clone()));
        }

        let mut state = self.state.lock().await;
        if state.revoked.contains(did) {
            return Ok(None);
        }
        if let Some(doc) = state.documents.get(did).cloned() {
            self.cache.insert(did.to_string(), doc.clone());
            return Ok(Some(doc.as_ref().clone()));
        }

        debug!("DID {} not in memory, reloading store", did);
        let mut persisted = self.store.load_all().await?;
        match persisted.remove(did) {
            Some(doc) => {
                let doc = Arc::new(doc);
                state.documents.insert(did.to_string(), doc.clone());
                self.cache.insert(did.to_string(), doc.clone());
                Ok(Some(doc.as_ref().clone()))
            }
            None => Ok(None),
        }
    }

    /// Resolves a DID and strips private key material from the result.
    pub async fn public_document(&self, did: &str) -> Result<Option<DIDDocument>> {
        Ok(self.resolve_did(did).await?.map(|doc| doc.public_view()))
    }

    /// Revokes a DID: removes it from memory, the cache and durable storage.
    ///
    /// # Returns
    /// - `Ok(true)` if the DID existed and is now revoked
    /// - `Ok(false)` if the DID is unknown
    /// - `Err` if the removal could not be persisted (the DID stays active)
    pub async fn revoke_did(&self, did: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.documents.contains_key(did) {
            return Ok(false);
        }

        let snapshot = state.snapshot_with(None, Some(did));
        self.persist(&snapshot).await?;

        state.documents.remove(did);
        state.revoked.insert(did.to_string());
        self.cache.remove(&did.to_string());
        self.revocation_epoch.fetch_add(1, Ordering::SeqCst);
        drop(state);

        info!("revoked DID {}", did);
        Ok(true)
    }

    /// Whether a DID has been revoked by this registry.
    pub async fn is_revoked(&self, did: &str) -> bool {
        self.state.lock().await.revoked.contains(did)
    }

    /// Every active DID, sorted.
    pub async fn list_dids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut dids: Vec<String> = state.documents.keys().cloned().collect();
        dids.sort();
        dids
    }

    /// The controller's PKCS#8 private key for `did`, if it is held here.
    pub async fn private_key(&self, did: &str) -> Result<Option<Vec<u8>>> {
        match self.resolve_did(did).await? {
            Some(doc) => doc.private_key_bytes().transpose(),
            None => Ok(None),
        }
    }

    /// Counter bumped on every revocation.
    pub fn revocation_epoch(&self) -> u64 {
        self.revocation_epoch.load(Ordering::SeqCst)
    }

    async fn persist(&self, documents: &DidDocuments) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.save_all(documents).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.storage_retries => {
                    attempt += 1;
                    warn!(
                        "DID store write failed ({}), retry {}/{}",
                        e, attempt, self.storage_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
