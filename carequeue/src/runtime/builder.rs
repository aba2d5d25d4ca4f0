use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::claim::ClaimStore;
use crate::config::NotifierConfig;
use crate::directory::Directory;
use crate::lease::{LeaseId, LeaseRegistry, LocalLease, WorkerLease};
use crate::notify::{Notifier, TracingNotifier};
use crate::picker::{NotifyPicker, NotifyStateStore};

use super::notifier::UnclaimedCaseNotifier;

/// Builder for constructing an [`UnclaimedCaseNotifier`] with explicit
/// dependencies.
///
/// The stores and the directory are required. Without a notifier the worker
/// only logs; without a lease it competes on the process-wide
/// [`LeaseRegistry::global`], which only excludes workers in the same process.
///
/// # Example
///
/// ```ignore
/// let notifier = NotifierBuilder::new(config.notifier.clone())
///     .with_claims(store.clone())
///     .with_notify_state(store.clone())
///     .with_directory(store.clone())
///     .with_notifier(Arc::new(push_gateway))
///     .with_lease(Arc::new(PgAdvisoryLease::new(pool, &config.notifier.lease_name, "node-1")))
///     .build()?;
/// Arc::new(notifier).start().await?;
/// ```
pub struct NotifierBuilder<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    config: NotifierConfig,
    claims: Option<Arc<C>>,
    notify_state: Option<Arc<S>>,
    directory: Option<Arc<D>>,
    notifier: Option<Arc<dyn Notifier>>,
    lease: Option<Arc<dyn WorkerLease>>,
    rng: Option<StdRng>,
}

impl<C, S, D> fmt::Debug for NotifierBuilder<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("NotifierBuilder");
        debug.field("config", &self.config);
        debug.field("claims_set", &self.claims.is_some());
        debug.field("notify_state_set", &self.notify_state.is_some());
        debug.field("directory_set", &self.directory.is_some());
        debug.field("notifier_set", &self.notifier.is_some());
        debug.field("lease_set", &self.lease.is_some());
        debug.field("seeded", &self.rng.is_some());

        if self.claims.is_some() {
            debug.field("claims_type", &type_name::<C>());
        }
        if self.notify_state.is_some() {
            debug.field("notify_state_type", &type_name::<S>());
        }
        if self.directory.is_some() {
            debug.field("directory_type", &type_name::<D>());
        }

        debug.finish()
    }
}

impl<C, S, D> NotifierBuilder<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            claims: None,
            notify_state: None,
            directory: None,
            notifier: None,
            lease: None,
            rng: None,
        }
    }

    pub fn with_claims(mut self, claims: Arc<C>) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn with_notify_state(mut self, notify_state: Arc<S>) -> Self {
        self.notify_state = Some(notify_state);
        self
    }

    pub fn with_directory(mut self, directory: Arc<D>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_lease(mut self, lease: Arc<dyn WorkerLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Seeds the picker's RNG so provider choices are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Build the notifier with all configured dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if a store or the directory is missing.
    pub fn build(self) -> anyhow::Result<UnclaimedCaseNotifier<C, S, D>> {
        let claims = self
            .claims
            .ok_or_else(|| anyhow::anyhow!("claims dependency missing"))?;
        let notify_state = self
            .notify_state
            .ok_or_else(|| anyhow::anyhow!("notify_state dependency missing"))?;
        let directory = self
            .directory
            .ok_or_else(|| anyhow::anyhow!("directory dependency missing"))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let config = self.config;
        let lease = self
            .lease
            .unwrap_or_else(|| Arc::new(default_lease(&config)));

        let rng = self.rng.unwrap_or_else(StdRng::from_entropy);
        let picker = NotifyPicker::new(Arc::clone(&notify_state), rng);

        Ok(UnclaimedCaseNotifier::new(
            config,
            claims,
            notify_state,
            picker,
            directory,
            notifier,
            lease,
        ))
    }
}

fn default_lease(config: &NotifierConfig) -> LocalLease {
    let holder = format!(
        "{}-{}-{}",
        config.lease_name,
        std::process::id(),
        LeaseId::new()
    );
    LocalLease::new(
        LeaseRegistry::global(),
        config.lease_name.clone(),
        holder,
        config.lease_ttl(),
    )
    .with_poll_interval(config.lease_poll_interval())
}
