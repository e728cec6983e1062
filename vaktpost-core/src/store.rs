//! ## vaktpost-core::store
//! **Policy Store boundary**
//!
//! The durable policy database lives outside this system; both the
//! reconciler and the verdict service only ever need a full snapshot.
//!
//! ### Implementations:
//! - `FilePolicyStore`: YAML/JSON policy file, re-read on every call
//! - `MemoryPolicyStore`: mutable in-process snapshot
//! - `CachedPolicyStore`: short-TTL read-through cache over any store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::policy::Policy;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Full snapshot of declared policies with their IPs and ports.
    async fn list_policies(&self) -> Result<Vec<Policy>, CoreError>;
}

#[async_trait]
impl<T: PolicyStore + ?Sized> PolicyStore for Arc<T> {
    async fn list_policies(&self) -> Result<Vec<Policy>, CoreError> {
        (**self).list_policies().await
    }
}

/// On-disk layout of a policy file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// Reads policies from a YAML or JSON file.
///
/// The file is read on every call so edits made by the management API are
/// picked up on the next cycle without a restart.
#[derive(Debug, Clone)]
pub struct FilePolicyStore {
    path: PathBuf,
}

impl FilePolicyStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }
}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn list_policies(&self) -> Result<Vec<Policy>, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CoreError::StoreUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        let file: PolicyFile = if self.is_json() {
            serde_json::from_str(&raw).map_err(|e| CoreError::PolicyFormat {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|e| CoreError::PolicyFormat {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        };

        debug!(
            path = %self.path.display(),
            count = file.policies.len(),
            "Loaded policy file"
        );
        Ok(file.policies)
    }
}

/// In-process policy snapshot.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl MemoryPolicyStore {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    pub fn replace(&self, policies: Vec<Policy>) {
        *self.policies.write() = policies;
    }

    /// Inserts `policy`, replacing any existing policy with the same id.
    pub fn upsert(&self, policy: Policy) {
        let mut policies = self.policies.write();
        match policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => policies.push(policy),
        }
    }

    pub fn remove(&self, id: u64) -> Option<Policy> {
        let mut policies = self.policies.write();
        let idx = policies.iter().position(|p| p.id == id)?;
        Some(policies.remove(idx))
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn list_policies(&self) -> Result<Vec<Policy>, CoreError> {
        Ok(self.policies.read().clone())
    }
}

/// Read-through cache in front of another store.
///
/// A failed read is returned as-is and leaves the cache empty, so callers
/// never see a snapshot older than `ttl`.
pub struct CachedPolicyStore<S> {
    inner: S,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Arc<Vec<Policy>>)>>,
}

impl<S: PolicyStore> CachedPolicyStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Drops the cached snapshot.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn fresh(&self) -> Option<Arc<Vec<Policy>>> {
        let cached = self.cached.lock();
        match cached.as_ref() {
            Some((loaded_at, policies)) if loaded_at.elapsed() < self.ttl => {
                Some(Arc::clone(policies))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl<S: PolicyStore> PolicyStore for CachedPolicyStore<S> {
    async fn list_policies(&self) -> Result<Vec<Policy>, CoreError> {
        if let Some(policies) = self.fresh() {
            trace!("Policy cache hit");
            return Ok(policies.as_ref().clone());
        }

        let result = self.inner.list_policies().await;
        match &result {
            Ok(policies) => {
                *self.cached.lock() = Some((Instant::now(), Arc::new(policies.clone())));
            }
            Err(_) => self.invalidate(),
        }
        result
    }
}
