use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::runtime::ShutdownToken;

/// Unique identifier for a worker lease grant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    /// Create a new lease ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distributed mutual exclusion for background workers.
///
/// Only the instance holding the lease runs; the others wait in
/// [`acquire`](WorkerLease::acquire).
#[async_trait]
pub trait WorkerLease: Send + Sync {
    /// Blocks until this instance holds the lease or `shutdown` fires.
    ///
    /// Returns `false` when shutdown won. Re-acquiring a lease already held
    /// by this instance refreshes it.
    async fn acquire(&self, shutdown: &ShutdownToken) -> anyhow::Result<bool>;

    /// Keeps a held lease alive. Returns `false` when it was lost.
    async fn extend(&self) -> anyhow::Result<bool>;

    /// Gives the lease up so another instance can take it.
    async fn release(&self) -> anyhow::Result<()>;

    /// Identifier of this instance, for logging.
    fn holder(&self) -> &str;
}

/// A granted lease with metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub lease_id: LeaseId,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
    /// Number of times this grant has been extended.
    pub renewals: u32,
}

impl LeaseGrant {
    pub fn new(holder: impl Into<String>, ttl: Duration) -> Self {
        Self {
            lease_id: LeaseId::new(),
            holder: holder.into(),
            expires_at: Utc::now() + ttl,
            renewals: 0,
        }
    }

    /// Checks if the lease has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Pushes the expiry to `ttl` from now.
    pub fn renew(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
        self.renewals += 1;
    }
}

static GLOBAL_REGISTRY: LazyLock<LeaseRegistry> = LazyLock::new(LeaseRegistry::new);

/// Shared table of named leases for instances living in one process.
#[derive(Clone, Debug, Default)]
pub struct LeaseRegistry {
    inner: Arc<LeaseRegistryInner>,
}

#[derive(Debug, Default)]
struct LeaseRegistryInner {
    grants: Mutex<HashMap<String, LeaseGrant>>,
    released: Notify,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by workers that were not given a lease.
    pub fn global() -> Self {
        GLOBAL_REGISTRY.clone()
    }

    /// Current grant for `name`, expired or not.
    pub fn grant(&self, name: &str) -> Option<LeaseGrant> {
        self.inner.grants.lock().get(name).cloned()
    }

    fn try_take(&self, name: &str, holder: &str, ttl: Duration) -> bool {
        let mut grants = self.inner.grants.lock();
        match grants.get_mut(name) {
            Some(grant) if grant.holder == holder => {
                grant.renew(ttl);
                true
            }
            Some(grant) if !grant.is_expired() => false,
            _ => {
                grants.insert(name.to_string(), LeaseGrant::new(holder, ttl));
                true
            }
        }
    }

    fn extend(&self, name: &str, holder: &str, ttl: Duration) -> bool {
        let mut grants = self.inner.grants.lock();
        match grants.get_mut(name) {
            Some(grant) if grant.holder == holder && !grant.is_expired() => {
                grant.renew(ttl);
                true
            }
            _ => false,
        }
    }

    fn release(&self, name: &str, holder: &str) {
        let removed = {
            let mut grants = self.inner.grants.lock();
            match grants.get(name) {
                Some(grant) if grant.holder == holder => grants.remove(name).is_some(),
                _ => false,
            }
        };
        if removed {
            self.inner.released.notify_waiters();
        }
    }
}

/// In-process [`WorkerLease`] backed by a [`LeaseRegistry`].
///
/// Instances sharing a registry behave like redundant service instances
/// sharing a lock service.
#[derive(Clone, Debug)]
pub struct LocalLease {
    registry: LeaseRegistry,
    name: String,
    holder: String,
    ttl: Duration,
    poll_interval: std::time::Duration,
}

impl LocalLease {
    /// # Arguments
    /// * `registry` - Registry shared by competing instances
    /// * `name` - Lease name
    /// * `holder` - Identifier of this instance
    /// * `ttl` - How long a grant lives without being extended
    pub fn new(
        registry: LeaseRegistry,
        name: impl Into<String>,
        holder: impl Into<String>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            name: name.into(),
            holder: holder.into(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(60)),
            poll_interval: std::time::Duration::from_millis(250),
        }
    }

    /// Sets how often a waiting instance re-checks an expired grant.
    pub fn with_poll_interval(mut self, poll_interval: std::time::Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn registry(&self) -> &LeaseRegistry {
        &self.registry
    }
}

#[async_trait]
impl WorkerLease for LocalLease {
    async fn acquire(&self, shutdown: &ShutdownToken) -> anyhow::Result<bool> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(false);
            }
            let released = self.registry.inner.released.notified();
            if self.registry.try_take(&self.name, &self.holder, self.ttl) {
                tracing::debug!(lease = %self.name, holder = %self.holder, "worker lease acquired");
                return Ok(true);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                _ = released => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn extend(&self) -> anyhow::Result<bool> {
        Ok(self.registry.extend(&self.name, &self.holder, self.ttl))
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.registry.release(&self.name, &self.holder);
        tracing::debug!(lease = %self.name, holder = %self.holder, "worker lease released");
        Ok(())
    }

    fn holder(&self) -> &str {
        &self.holder
    }
}
