//! Jump-ball claims on cases nobody has been assigned to yet.
//!
//! A case enters the pool unclaimed. Opening it takes a temporary claim that
//! expires unless the provider keeps working on it; submitting a treatment
//! plan (or triaging the visit) turns the claim into a permanent assignment.
//! Expiry is evaluated lazily against "now" on every read and swap, so no
//! sweeper is needed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::action::ActionUrl;
use crate::config::ClaimConfig;
use crate::item::{CaseId, EventType, ItemStatus, PatientId, ProviderId, QueueItem, Region};
use crate::telemetry;

/// Stored status of a case's claim.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Unclaimed,
    TemporarilyClaimed,
    PermanentlyAssigned,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Unclaimed => "UNCLAIMED",
            ClaimStatus::TemporarilyClaimed => "TEMP_CLAIMED",
            ClaimStatus::PermanentlyAssigned => "PERMANENTLY_ASSIGNED",
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw {
            "UNCLAIMED" => Ok(ClaimStatus::Unclaimed),
            "TEMP_CLAIMED" => Ok(ClaimStatus::TemporarilyClaimed),
            "PERMANENTLY_ASSIGNED" => Ok(ClaimStatus::PermanentlyAssigned),
            other => Err(anyhow::anyhow!("unknown claim status `{other}`")),
        }
    }
}

/// Claim columns of a case in the jump-ball pool.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub case_id: CaseId,
    pub provider_id: Option<ProviderId>,
    pub status: ClaimStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn unclaimed(case_id: CaseId) -> Self {
        Self {
            case_id,
            provider_id: None,
            status: ClaimStatus::Unclaimed,
            expires_at: None,
        }
    }

    pub fn temporary(case_id: CaseId, provider_id: ProviderId, expires_at: DateTime<Utc>) -> Self {
        Self {
            case_id,
            provider_id: Some(provider_id),
            status: ClaimStatus::TemporarilyClaimed,
            expires_at: Some(expires_at),
        }
    }

    pub fn permanent(case_id: CaseId, provider_id: ProviderId) -> Self {
        Self {
            case_id,
            provider_id: Some(provider_id),
            status: ClaimStatus::PermanentlyAssigned,
            expires_at: None,
        }
    }

    /// Whether a temporary claim has lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::TemporarilyClaimed
            && self.expires_at.map_or(true, |expires_at| expires_at < now)
    }

    /// Status with lazy expiry applied: a lapsed temporary claim is unclaimed.
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> ClaimStatus {
        if self.is_expired_at(now) {
            ClaimStatus::Unclaimed
        } else {
            self.status
        }
    }

    /// Whether `provider_id` holds a live temporary claim at `now`.
    pub fn is_temporarily_held_by(&self, provider_id: ProviderId, now: DateTime<Utc>) -> bool {
        self.effective_status_at(now) == ClaimStatus::TemporarilyClaimed
            && self.provider_id == Some(provider_id)
    }
}

/// A case waiting in the jump-ball pool of its region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnclaimedCase {
    pub case_id: CaseId,
    pub patient_id: PatientId,
    pub visit_id: i64,
    pub region: Region,
    pub description: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl UnclaimedCase {
    /// How the case shows in a provider's global (claimable) queue.
    pub fn to_queue_item(&self, provider_id: ProviderId) -> QueueItem {
        QueueItem::new(
            provider_id,
            self.visit_id,
            EventType::PatientVisit,
            ItemStatus::Pending,
        )
        .with_patient(self.patient_id)
        .with_description(&self.description, &self.short_description)
        .with_action_url(ActionUrl::ViewPatientVisit {
            patient_id: self.patient_id,
            visit_id: self.visit_id,
            case_id: self.case_id,
        })
        .with_auth_url(ActionUrl::ClaimPatientCase {
            patient_id: self.patient_id,
            case_id: self.case_id,
        })
        .with_tags(self.tags.iter().cloned())
        .with_enqueued_at(self.enqueued_at)
    }
}

/// Backend holding the jump-ball pool and its claim rows.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Adds a case to the pool as unclaimed.
    ///
    /// Returns `false` and leaves the existing row untouched when the case is
    /// already in the pool.
    async fn insert_unclaimed(&self, case: UnclaimedCase) -> anyhow::Result<bool>;

    /// Current claim row of a case, or `None` when it was never pooled.
    async fn load_claim(&self, case_id: CaseId) -> anyhow::Result<Option<Claim>>;

    /// Writes `next` only if the stored row still equals `expected`.
    ///
    /// When `next` is a permanent assignment the store also attaches the
    /// provider to the case's care team as its active doctor, in the same
    /// atomic write.
    async fn swap_claim(&self, expected: &Claim, next: Claim) -> anyhow::Result<bool>;

    /// Distinct regions holding cases that are effectively unclaimed at
    /// `now`, ordered by their longest-waiting case.
    async fn regions_with_unclaimed_cases(&self, now: DateTime<Utc>)
        -> anyhow::Result<Vec<Region>>;
}

/// Claim protocol over a [`ClaimStore`].
pub struct ClaimEngine<S: ClaimStore> {
    store: Arc<S>,
    config: ClaimConfig,
}

impl<S: ClaimStore> Clone for ClaimEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: ClaimStore> std::fmt::Debug for ClaimEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimEngine")
            .field("store_type", &std::any::type_name::<S>())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: ClaimStore> ClaimEngine<S> {
    pub fn new(store: Arc<S>, config: ClaimConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Lease applied when a caller does not choose one.
    pub fn default_lease(&self) -> Duration {
        self.config.lease_duration()
    }

    /// Places a case in the jump-ball pool. Idempotent on `case_id`.
    pub async fn make_available(&self, case: UnclaimedCase) -> anyhow::Result<bool> {
        let case_id = case.case_id;
        let region = case.region.clone();
        let added = self.store.insert_unclaimed(case).await?;
        debug!(case_id = %case_id, region = %region, added, "case made available");
        Ok(added)
    }

    /// Effective claim status now, or `None` when the case was never pooled.
    pub async fn claim_status(&self, case_id: CaseId) -> anyhow::Result<Option<ClaimStatus>> {
        let claim = self.store.load_claim(case_id).await?;
        Ok(claim.map(|claim| claim.effective_status_at(Utc::now())))
    }

    /// Takes a temporary claim when the case is effectively unclaimed.
    ///
    /// Of two concurrent callers on the same case exactly one gets `true`.
    ///
    /// # Arguments
    /// * `provider_id` - Provider taking the claim
    /// * `case_id` - Case in the jump-ball pool
    /// * `lease` - How long the claim lasts without an extension
    pub async fn claim_if_unclaimed(
        &self,
        provider_id: ProviderId,
        case_id: CaseId,
        lease: Duration,
    ) -> anyhow::Result<bool> {
        let span = telemetry::claim_span(provider_id, case_id, "claim");
        async move {
            let Some(current) = self.store.load_claim(case_id).await? else {
                telemetry::record_claim("claim", "not_pooled");
                return Ok(false);
            };

            let now = Utc::now();
            if current.effective_status_at(now) != ClaimStatus::Unclaimed {
                telemetry::record_claim("claim", "already_claimed");
                return Ok(false);
            }

            let next = Claim::temporary(case_id, provider_id, now + lease);
            let won = self.store.swap_claim(&current, next).await?;
            telemetry::record_claim("claim", if won { "claimed" } else { "lost_race" });
            Ok(won)
        }
        .instrument(span)
        .await
    }

    /// Pushes out the expiry of the provider's live temporary claim.
    ///
    /// A no-op returning `false` when the provider does not hold one.
    pub async fn extend_claim(
        &self,
        provider_id: ProviderId,
        case_id: CaseId,
        lease: Duration,
    ) -> anyhow::Result<bool> {
        let span = telemetry::claim_span(provider_id, case_id, "extend");
        async move {
            let Some(current) = self.store.load_claim(case_id).await? else {
                return Ok(false);
            };

            let now = Utc::now();
            if !current.is_temporarily_held_by(provider_id, now) {
                telemetry::record_claim("extend", "not_held");
                return Ok(false);
            }

            let next = Claim::temporary(case_id, provider_id, now + lease);
            let extended = self.store.swap_claim(&current, next).await?;
            telemetry::record_claim("extend", if extended { "extended" } else { "lost_race" });
            Ok(extended)
        }
        .instrument(span)
        .await
    }

    /// Converts the provider's live temporary claim into a permanent
    /// assignment. A no-op returning `false` otherwise.
    pub async fn finalize_assignment(
        &self,
        provider_id: ProviderId,
        case_id: CaseId,
    ) -> anyhow::Result<bool> {
        let span = telemetry::claim_span(provider_id, case_id, "finalize");
        async move {
            let Some(current) = self.store.load_claim(case_id).await? else {
                return Ok(false);
            };

            if !current.is_temporarily_held_by(provider_id, Utc::now()) {
                telemetry::record_claim("finalize", "not_held");
                return Ok(false);
            }

            let finalized = self
                .store
                .swap_claim(&current, Claim::permanent(case_id, provider_id))
                .await?;
            telemetry::record_claim(
                "finalize",
                if finalized { "assigned" } else { "lost_race" },
            );
            Ok(finalized)
        }
        .instrument(span)
        .await
    }
}
