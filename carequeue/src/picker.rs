//! Fair selection of the provider to notify about unclaimed work in a region.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::item::{ProviderId, Region};
use crate::telemetry;

/// A provider eligible to be notified, with its last notification time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NotifyCandidate {
    pub provider_id: ProviderId,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Backend for licences and last-notified bookkeeping.
#[async_trait]
pub trait NotifyStateStore: Send + Sync {
    /// When a provider was last notified about the region, if ever.
    async fn region_last_notified(&self, region: &Region)
        -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Providers licensed in `region`, not licensed in any of
    /// `regions_to_avoid`, and never notified or last notified before
    /// `notified_before`.
    async fn notify_candidates(
        &self,
        region: &Region,
        regions_to_avoid: &[Region],
        notified_before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<NotifyCandidate>>;

    /// Stamps both the region and the provider as notified at `at`.
    async fn record_notified(
        &self,
        region: &Region,
        provider_id: ProviderId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Providers licensed to practise in `region`.
    async fn eligible_providers(&self, region: &Region) -> anyhow::Result<Vec<ProviderId>>;

    /// Replaces the providers licensed in `region`.
    async fn set_eligible_providers(
        &self,
        region: &Region,
        providers: Vec<ProviderId>,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PickRequest {
    pub region: Region,
    /// Regions handled earlier in the same cycle; their providers are
    /// avoided for as long as that leaves anyone to notify.
    pub regions_to_avoid: Vec<Region>,
    pub region_rate_limit: Duration,
    pub provider_rate_limit: Duration,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PickOutcome {
    Provider(ProviderId),
    /// The region was notified too recently.
    RateLimited,
    NoProviderFound,
}

/// Picks providers at random, preferring ones who were never notified.
pub struct NotifyPicker<S: NotifyStateStore> {
    store: Arc<S>,
    rng: Mutex<StdRng>,
}

impl<S: NotifyStateStore> std::fmt::Debug for NotifyPicker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyPicker")
            .field("store_type", &std::any::type_name::<S>())
            .finish()
    }
}

impl<S: NotifyStateStore> NotifyPicker<S> {
    pub fn new(store: Arc<S>, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_seed(store: Arc<S>, seed: u64) -> Self {
        Self::new(store, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(store: Arc<S>) -> Self {
        Self::new(store, StdRng::from_entropy())
    }

    /// Chooses the provider to notify about unclaimed cases in a region.
    ///
    /// Avoidance is relaxed one region at a time, starting with the region
    /// handled most recently, until some provider qualifies. Does not record
    /// the notification; the caller does that once it has been sent.
    pub async fn pick_provider_to_notify(&self, request: &PickRequest) -> anyhow::Result<PickOutcome> {
        self.pick_provider_to_notify_at(request, Utc::now()).await
    }

    /// [`pick_provider_to_notify`](Self::pick_provider_to_notify) evaluated
    /// at `now`. A region stays rate limited up to and including
    /// `last_notified + region_rate_limit`.
    pub async fn pick_provider_to_notify_at(
        &self,
        request: &PickRequest,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PickOutcome> {
        let span = telemetry::pick_span(&request.region, request.regions_to_avoid.len());
        async move {
            if let Some(last) = self.store.region_last_notified(&request.region).await? {
                if last + request.region_rate_limit >= now {
                    debug!(last_notified_at = %last, "region rate limited");
                    return Ok(PickOutcome::RateLimited);
                }
            }

            let notified_before = now - request.provider_rate_limit;
            for avoid in (0..=request.regions_to_avoid.len()).rev() {
                let candidates = self
                    .store
                    .notify_candidates(
                        &request.region,
                        &request.regions_to_avoid[..avoid],
                        notified_before,
                    )
                    .await?;
                if candidates.is_empty() {
                    continue;
                }

                if let Some(provider_id) = self.choose(&candidates) {
                    debug!(provider_id = %provider_id, avoided_regions = avoid, "provider picked");
                    return Ok(PickOutcome::Provider(provider_id));
                }
            }

            telemetry::record_no_provider_found(&request.region);
            Ok(PickOutcome::NoProviderFound)
        }
        .instrument(span)
        .await
    }

    fn choose(&self, candidates: &[NotifyCandidate]) -> Option<ProviderId> {
        let never_notified: Vec<ProviderId> = candidates
            .iter()
            .filter(|c| c.last_notified_at.is_none())
            .map(|c| c.provider_id)
            .collect();

        let mut rng = self.rng.lock();
        if never_notified.is_empty() {
            candidates.choose(&mut *rng).map(|c| c.provider_id)
        } else {
            never_notified.choose(&mut *rng).copied()
        }
    }
}
