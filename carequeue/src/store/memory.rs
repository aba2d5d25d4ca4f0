use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::claim::{Claim, ClaimStatus, ClaimStore, UnclaimedCase};
use crate::directory::{
    CareTeam, CareTeamMember, CaseProfile, Directory, PatientProfile, ProviderProfile,
};
use crate::error::RoutingError;
use crate::item::{CaseId, PatientId, ProviderId, QueueItem, Region, Role};
use crate::picker::{NotifyCandidate, NotifyStateStore};
use crate::queue::{assign_positions, sort_by_enqueued, QueueStore};
use crate::telemetry;
use crate::transition::{self, QueueTransition, TransitionOutcome};

/// In-memory care store: queues, jump-ball pool, notify state and directory.
///
/// All state sits behind one lock, so every batch and claim swap is atomic.
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryCareStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<ProviderId, Vec<QueueItem>>,
    pool: Vec<PoolEntry>,
    region_notified: HashMap<Region, DateTime<Utc>>,
    provider_notified: HashMap<ProviderId, DateTime<Utc>>,
    licences: BTreeMap<Region, BTreeSet<ProviderId>>,
    providers: HashMap<ProviderId, ProviderProfile>,
    patients: HashMap<PatientId, PatientProfile>,
    cases: HashMap<CaseId, CaseProfile>,
    care_teams: HashMap<CaseId, Vec<CareTeamMember>>,
}

#[derive(Clone, Debug)]
struct PoolEntry {
    case: UnclaimedCase,
    claim: Claim,
}

impl MemoryState {
    fn attach(&mut self, case_id: CaseId, provider_id: ProviderId, role: Role) {
        let members = self.care_teams.entry(case_id).or_default();
        for member in members.iter_mut().filter(|m| m.role == role) {
            member.active = false;
        }
        match members.iter_mut().find(|m| m.provider_id == provider_id) {
            Some(member) => {
                member.role = role;
                member.active = true;
            }
            None => members.push(CareTeamMember {
                provider_id,
                role,
                active: true,
            }),
        }
    }

    fn licensed_in(&self, region: &Region) -> BTreeSet<ProviderId> {
        self.licences.get(region).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for InMemoryCareStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryCareStore")
            .field("queues", &state.queues.len())
            .field("pooled_cases", &state.pool.len())
            .field("regions", &state.licences.len())
            .field("providers", &state.providers.len())
            .finish()
    }
}

impl InMemoryCareStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, profile: ProviderProfile) {
        self.state.lock().providers.insert(profile.id, profile);
    }

    pub fn add_patient(&self, profile: PatientProfile) {
        self.state.lock().patients.insert(profile.id, profile);
    }

    pub fn add_case(&self, profile: CaseProfile) {
        self.state.lock().cases.insert(profile.id, profile);
    }

    /// Makes `provider_id` the active care-team member for `role`,
    /// deactivating whoever held that role before.
    pub fn assign_to_care_team(&self, case_id: CaseId, provider_id: ProviderId, role: Role) {
        self.state.lock().attach(case_id, provider_id, role);
    }

    pub fn license_provider(&self, region: &Region, provider_id: ProviderId) {
        self.state
            .lock()
            .licences
            .entry(region.clone())
            .or_default()
            .insert(provider_id);
    }

    /// Every row of a provider's queue in storage order, open and completed.
    pub fn all_items(&self, provider_id: ProviderId) -> Vec<QueueItem> {
        self.state
            .lock()
            .queues
            .get(&provider_id)
            .cloned()
            .unwrap_or_default()
    }

    /// When the provider was last notified by the notifier worker.
    pub fn provider_last_notified(&self, provider_id: ProviderId) -> Option<DateTime<Utc>> {
        self.state.lock().provider_notified.get(&provider_id).copied()
    }

    fn listing(&self, provider_id: ProviderId, open: bool) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .state
            .lock()
            .queues
            .get(&provider_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.status.is_open() == open)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_by_enqueued(&mut items);
        assign_positions(&mut items);
        items
    }
}

#[async_trait]
impl QueueStore for InMemoryCareStore {
    async fn apply_transitions(
        &self,
        provider_id: ProviderId,
        transitions: Vec<QueueTransition>,
    ) -> anyhow::Result<TransitionOutcome> {
        if transitions.is_empty() {
            return Ok(TransitionOutcome::default());
        }

        let span = telemetry::apply_span(provider_id, transitions.len());
        let outcome = span.in_scope(|| {
            let mut state = self.state.lock();
            let rows = state.queues.entry(provider_id).or_default();
            transition::apply_batch(rows, provider_id, transitions)
        })?;

        telemetry::record_transitions_applied(provider_id, &outcome);
        Ok(outcome)
    }

    async fn pending_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        Ok(self.listing(provider_id, true))
    }

    async fn completed_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        Ok(self.listing(provider_id, false))
    }

    async fn unclaimed_eligible_items(
        &self,
        provider_id: ProviderId,
    ) -> anyhow::Result<Vec<QueueItem>> {
        let now = Utc::now();
        let mut items: Vec<QueueItem> = {
            let state = self.state.lock();
            let regions: BTreeSet<&Region> = state
                .licences
                .iter()
                .filter(|(_, providers)| providers.contains(&provider_id))
                .map(|(region, _)| region)
                .collect();

            state
                .pool
                .iter()
                .filter(|entry| regions.contains(&entry.case.region))
                .filter(|entry| {
                    entry.claim.effective_status_at(now) == ClaimStatus::Unclaimed
                        || entry.claim.is_temporarily_held_by(provider_id, now)
                })
                .map(|entry| entry.case.to_queue_item(provider_id))
                .collect()
        };
        sort_by_enqueued(&mut items);
        assign_positions(&mut items);
        Ok(items)
    }
}

#[async_trait]
impl ClaimStore for InMemoryCareStore {
    async fn insert_unclaimed(&self, case: UnclaimedCase) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.pool.iter().any(|entry| entry.case.case_id == case.case_id) {
            return Ok(false);
        }
        let claim = Claim::unclaimed(case.case_id);
        state.pool.push(PoolEntry { case, claim });
        Ok(true)
    }

    async fn load_claim(&self, case_id: CaseId) -> anyhow::Result<Option<Claim>> {
        let state = self.state.lock();
        Ok(state
            .pool
            .iter()
            .find(|entry| entry.case.case_id == case_id)
            .map(|entry| entry.claim.clone()))
    }

    async fn swap_claim(&self, expected: &Claim, next: Claim) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let Some(entry) = state
            .pool
            .iter_mut()
            .find(|entry| entry.case.case_id == expected.case_id)
        else {
            return Ok(false);
        };
        if entry.claim != *expected {
            return Ok(false);
        }

        let assignment = match (next.status, next.provider_id) {
            (ClaimStatus::PermanentlyAssigned, Some(provider_id)) => Some(provider_id),
            _ => None,
        };
        entry.claim = next;

        if let Some(provider_id) = assignment {
            state.attach(expected.case_id, provider_id, Role::Doctor);
        }
        Ok(true)
    }

    async fn regions_with_unclaimed_cases(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Region>> {
        let state = self.state.lock();
        let mut waiting: Vec<&PoolEntry> = state
            .pool
            .iter()
            .filter(|entry| entry.claim.effective_status_at(now) == ClaimStatus::Unclaimed)
            .collect();
        waiting.sort_by_key(|entry| entry.case.enqueued_at);

        let mut regions: Vec<Region> = Vec::new();
        for entry in waiting {
            if !regions.contains(&entry.case.region) {
                regions.push(entry.case.region.clone());
            }
        }
        Ok(regions)
    }
}

#[async_trait]
impl NotifyStateStore for InMemoryCareStore {
    async fn region_last_notified(
        &self,
        region: &Region,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().region_notified.get(region).copied())
    }

    async fn notify_candidates(
        &self,
        region: &Region,
        regions_to_avoid: &[Region],
        notified_before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<NotifyCandidate>> {
        let state = self.state.lock();
        let avoided: BTreeSet<ProviderId> = regions_to_avoid
            .iter()
            .flat_map(|r| state.licensed_in(r))
            .collect();

        Ok(state
            .licensed_in(region)
            .into_iter()
            .filter(|provider_id| !avoided.contains(provider_id))
            .map(|provider_id| NotifyCandidate {
                provider_id,
                last_notified_at: state.provider_notified.get(&provider_id).copied(),
            })
            .filter(|candidate| {
                candidate
                    .last_notified_at
                    .map_or(true, |at| at < notified_before)
            })
            .collect())
    }

    async fn record_notified(
        &self,
        region: &Region,
        provider_id: ProviderId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.region_notified.insert(region.clone(), at);
        state.provider_notified.insert(provider_id, at);
        Ok(())
    }

    async fn eligible_providers(&self, region: &Region) -> anyhow::Result<Vec<ProviderId>> {
        Ok(self.state.lock().licensed_in(region).into_iter().collect())
    }

    async fn set_eligible_providers(
        &self,
        region: &Region,
        providers: Vec<ProviderId>,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .licences
            .insert(region.clone(), providers.into_iter().collect());
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryCareStore {
    async fn provider(&self, id: ProviderId) -> anyhow::Result<ProviderProfile> {
        self.state
            .lock()
            .providers
            .get(&id)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownProvider(id).into())
    }

    async fn patient(&self, id: PatientId) -> anyhow::Result<PatientProfile> {
        self.state
            .lock()
            .patients
            .get(&id)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownPatient(id).into())
    }

    async fn patient_case(&self, id: CaseId) -> anyhow::Result<CaseProfile> {
        self.state
            .lock()
            .cases
            .get(&id)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownCase(id).into())
    }

    async fn care_team(&self, case_id: CaseId) -> anyhow::Result<CareTeam> {
        let members = self
            .state
            .lock()
            .care_teams
            .get(&case_id)
            .cloned()
            .unwrap_or_default();
        Ok(CareTeam { members })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::error::QueueError;
    use crate::item::{EventType, ItemStatus};

    const DOCTOR: ProviderId = ProviderId(1);

    fn pending(item_id: i64) -> QueueItem {
        QueueItem::new(DOCTOR, item_id, EventType::CaseMessage, ItemStatus::Pending)
            .with_description("message", "message")
    }

    fn pooled(case_id: i64, region: &str, waited_minutes: i64) -> UnclaimedCase {
        UnclaimedCase {
            case_id: CaseId(case_id),
            patient_id: PatientId(case_id * 10),
            visit_id: case_id * 100,
            region: Region::new(region),
            description: "New visit".to_string(),
            short_description: "New visit".to_string(),
            tags: vec!["Acne".to_string()],
            enqueued_at: Utc::now() - Duration::minutes(waited_minutes),
        }
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_queue_untouched() {
        let store = InMemoryCareStore::new();
        store
            .apply_transitions(DOCTOR, vec![QueueTransition::insert(pending(1))])
            .await
            .unwrap();

        let err = store
            .apply_transitions(
                DOCTOR,
                vec![
                    QueueTransition::remove(pending(1).key()),
                    QueueTransition::insert(pending(2).with_description("", "")),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::InvalidItem { .. })
        ));
        assert_eq!(store.all_items(DOCTOR).len(), 1);
    }

    #[tokio::test]
    async fn test_listings_split_open_and_completed() {
        let store = InMemoryCareStore::new();
        let replied = QueueItem::new(DOCTOR, 3, EventType::CaseMessage, ItemStatus::Replied)
            .with_description("replied", "replied");
        store
            .apply_transitions(
                DOCTOR,
                vec![
                    QueueTransition::insert(pending(1)),
                    QueueTransition::insert(replied),
                    QueueTransition::insert(pending(2)),
                ],
            )
            .await
            .unwrap();

        let pending_items = store.pending_items(DOCTOR).await.unwrap();
        assert_eq!(
            pending_items.iter().map(|i| i.item_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(pending_items[1].position_in_queue, Some(2));

        let history = store.completed_items(DOCTOR).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ItemStatus::Replied);
    }

    #[tokio::test]
    async fn test_regions_ordered_by_longest_waiting_case() {
        let store = InMemoryCareStore::new();
        store.insert_unclaimed(pooled(1, "NY", 5)).await.unwrap();
        store.insert_unclaimed(pooled(2, "CA", 30)).await.unwrap();
        store.insert_unclaimed(pooled(3, "NY", 60)).await.unwrap();
        store.insert_unclaimed(pooled(4, "TX", 1)).await.unwrap();

        // TX's only case is claimed, so TX drops out.
        let claim = store.load_claim(CaseId(4)).await.unwrap().unwrap();
        let taken = Claim::temporary(CaseId(4), DOCTOR, Utc::now() + Duration::minutes(15));
        assert!(store.swap_claim(&claim, taken).await.unwrap());

        let regions = store.regions_with_unclaimed_cases(Utc::now()).await.unwrap();
        assert_eq!(regions, vec![Region::new("NY"), Region::new("CA")]);
    }

    #[tokio::test]
    async fn test_stale_swap_is_rejected() {
        let store = InMemoryCareStore::new();
        store.insert_unclaimed(pooled(1, "CA", 0)).await.unwrap();
        let original = store.load_claim(CaseId(1)).await.unwrap().unwrap();

        let mine = Claim::temporary(CaseId(1), ProviderId(1), Utc::now() + Duration::minutes(1));
        let theirs = Claim::temporary(CaseId(1), ProviderId(2), Utc::now() + Duration::minutes(1));
        assert!(store.swap_claim(&original, mine).await.unwrap());
        assert!(!store.swap_claim(&original, theirs).await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_swap_attaches_doctor_to_care_team() {
        let store = InMemoryCareStore::new();
        store.insert_unclaimed(pooled(1, "CA", 0)).await.unwrap();
        store.assign_to_care_team(CaseId(1), ProviderId(8), Role::CareCoordinator);

        let original = store.load_claim(CaseId(1)).await.unwrap().unwrap();
        assert!(store
            .swap_claim(&original, Claim::permanent(CaseId(1), DOCTOR))
            .await
            .unwrap());

        let team = store.care_team(CaseId(1)).await.unwrap();
        assert_eq!(team.active_doctor(), Some(DOCTOR));
        assert_eq!(team.active_care_coordinator(), Some(ProviderId(8)));
    }

    #[tokio::test]
    async fn test_unclaimed_eligible_items_follow_licences_and_claims() {
        let store = InMemoryCareStore::new();
        store.license_provider(&Region::new("CA"), DOCTOR);
        store.insert_unclaimed(pooled(1, "CA", 10)).await.unwrap();
        store.insert_unclaimed(pooled(2, "CA", 5)).await.unwrap();
        store.insert_unclaimed(pooled(3, "NY", 20)).await.unwrap();

        // Case 2 is held by someone else.
        let claim = store.load_claim(CaseId(2)).await.unwrap().unwrap();
        let other = Claim::temporary(CaseId(2), ProviderId(5), Utc::now() + Duration::minutes(5));
        store.swap_claim(&claim, other).await.unwrap();

        let items = store.unclaimed_eligible_items(DOCTOR).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, 100);
        assert_eq!(items[0].provider_id, DOCTOR);
        assert_eq!(items[0].position_in_queue, Some(1));
        assert!(items[0].auth_url.is_some());
    }

    #[tokio::test]
    async fn test_directory_reports_unknown_records() {
        let store = InMemoryCareStore::new();
        let err = store.provider(ProviderId(404)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RoutingError>(),
            Some(&RoutingError::UnknownProvider(ProviderId(404)))
        );
        assert!(store.care_team(CaseId(1)).await.unwrap().members.is_empty());
    }
}
