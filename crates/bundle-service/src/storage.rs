//! Persistence of bundle ownership and service membership
//!
//! Writes are staged in a per-request [`Session`] and reach the backing
//! [`BundleStore`] in one batch on commit. Reads always see committed state.

use async_trait::async_trait;
use bundle_common::{BundleRecord, Error, Result, ServiceRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A staged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    PutBundle(BundleRecord),
    PutService(ServiceRecord),
    /// Deletes the bundle and, in cascade, all of its services
    DeleteBundle(String),
}

/// Durable record of bundles and their services
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn get_bundle(&self, bundle_id: &str) -> Result<Option<BundleRecord>>;

    async fn bundle_exists(&self, bundle_id: &str) -> Result<bool> {
        Ok(self.get_bundle(bundle_id).await?.is_some())
    }

    /// Services of a bundle, in the order they were recorded
    async fn list_services(&self, bundle_id: &str) -> Result<Vec<ServiceRecord>>;

    /// Identifiers of the bundles owned by a user, sorted
    async fn list_user_bundles(&self, user_id: &str) -> Result<Vec<String>>;

    /// Apply a batch of changes atomically
    async fn apply(&self, changes: Vec<Change>) -> Result<()>;
}

/// Unit of work over a store, scoped to one request
pub struct Session {
    store: Arc<dyn BundleStore>,
    pending: Vec<Change>,
}

impl Session {
    pub fn new(store: Arc<dyn BundleStore>) -> Self {
        Self {
            store,
            pending: Vec::new(),
        }
    }

    pub fn add_bundle(&mut self, bundle: BundleRecord) {
        debug!("Staging bundle ({})", bundle.bundle_id);
        self.pending.push(Change::PutBundle(bundle));
    }

    pub fn add_service(&mut self, service: ServiceRecord) {
        debug!("Staging service ({})", service.service_id);
        self.pending.push(Change::PutService(service));
    }

    pub fn delete_bundle(&mut self, bundle_id: &str) {
        debug!("Staging deletion of bundle ({})", bundle_id);
        self.pending.push(Change::DeleteBundle(bundle_id.to_string()));
    }

    pub fn pending(&self) -> &[Change] {
        &self.pending
    }

    /// Committed bundle record, `NotFound` if there is none
    pub async fn find_bundle(&self, bundle_id: &str) -> Result<BundleRecord> {
        match self.store.get_bundle(bundle_id).await? {
            Some(bundle) => {
                debug!("Bundle ({}) found", bundle_id);
                Ok(bundle)
            }
            None => {
                warn!("No bundle named ({}) found in the database", bundle_id);
                Err(Error::NotFound(bundle_id.to_string()))
            }
        }
    }

    pub async fn bundle_exists(&self, bundle_id: &str) -> Result<bool> {
        self.store.bundle_exists(bundle_id).await
    }

    pub async fn services_of(&self, bundle_id: &str) -> Result<Vec<ServiceRecord>> {
        self.store.list_services(bundle_id).await
    }

    pub async fn user_bundles(&self, user_id: &str) -> Result<Vec<String>> {
        self.store.list_user_bundles(user_id).await
    }

    /// Write every staged change in one batch. Staged changes are consumed
    /// even when the commit fails.
    pub async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let changes = std::mem::take(&mut self.pending);
        let count = changes.len();
        self.store.apply(changes).await?;

        debug!("Committed {} change(s)", count);
        Ok(())
    }

    /// Discard staged changes, returning how many were dropped
    pub fn rollback(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            debug!("Rolled back {} change(s)", count);
        }
        count
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Session dropped with {} uncommitted change(s), discarding them",
                self.pending.len()
            );
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    bundles: HashMap<String, BundleRecord>,
    services: HashMap<String, Vec<ServiceRecord>>,
}

impl MemoryState {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::PutBundle(bundle) => {
                if self.bundles.contains_key(&bundle.bundle_id) {
                    return Err(Error::Storage(format!(
                        "Bundle ({}) already exists",
                        bundle.bundle_id
                    )));
                }
                self.services.insert(bundle.bundle_id.clone(), Vec::new());
                self.bundles.insert(bundle.bundle_id.clone(), bundle);
            }
            Change::PutService(service) => {
                let taken = self
                    .services
                    .values()
                    .flatten()
                    .any(|existing| existing.service_id == service.service_id);
                if taken {
                    return Err(Error::Storage(format!(
                        "Service ({}) already exists",
                        service.service_id
                    )));
                }
                match self.services.get_mut(&service.bundle_id) {
                    Some(services) => services.push(service),
                    None => {
                        return Err(Error::Storage(format!(
                            "Service ({}) refers to unknown bundle ({})",
                            service.service_id, service.bundle_id
                        )))
                    }
                }
            }
            Change::DeleteBundle(bundle_id) => {
                if self.bundles.remove(&bundle_id).is_none() {
                    return Err(Error::NotFound(bundle_id));
                }
                self.services.remove(&bundle_id);
            }
        }
        Ok(())
    }
}

/// In-memory store for development and testing
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `apply` fail without writing anything
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn bundle_count(&self) -> usize {
        self.state.read().await.bundles.len()
    }

    pub async fn service_count(&self) -> usize {
        self.state.read().await.services.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn get_bundle(&self, bundle_id: &str) -> Result<Option<BundleRecord>> {
        Ok(self.state.read().await.bundles.get(bundle_id).cloned())
    }

    async fn list_services(&self, bundle_id: &str) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .state
            .read()
            .await
            .services
            .get(bundle_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_user_bundles(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut bundle_ids: Vec<String> = state
            .bundles
            .values()
            .filter(|bundle| bundle.is_owned_by(user_id))
            .map(|bundle| bundle.bundle_id.clone())
            .collect();
        bundle_ids.sort();
        Ok(bundle_ids)
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::Storage("commit rejected by the store".to_string()));
        }

        let mut state = self.state.write().await;
        let mut next = state.clone();
        for change in changes {
            next.apply(change)?;
        }
        *state = next;
        Ok(())
    }
}
