use carequeue::*;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Seeds an [`InMemoryCareStore`] with providers, patients, cases and
/// licences, and wires routers and notifiers on top of it.
///
/// ```ignore
/// let fixture = CareFixture::new()
///     .doctor(10, "Dr. Kohen")
///     .care_coordinator(20, "Sam")
///     .patient(30, "Ada", "Lovelace")
///     .case(40, 30, "Acne");
/// ```
#[derive(Clone, Debug, Default)]
pub struct CareFixture {
    store: Arc<InMemoryCareStore>,
}

impl CareFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> Arc<InMemoryCareStore> {
        Arc::clone(&self.store)
    }

    /// Adds a doctor whose account id is `id + 100`.
    pub fn doctor(self, id: i64, short_name: &str) -> Self {
        self.provider(id, Role::Doctor, short_name)
    }

    /// Adds a care coordinator whose account id is `id + 100`.
    pub fn care_coordinator(self, id: i64, short_name: &str) -> Self {
        self.provider(id, Role::CareCoordinator, short_name)
    }

    fn provider(self, id: i64, role: Role, short_name: &str) -> Self {
        self.store.add_provider(ProviderProfile {
            id: ProviderId(id),
            account_id: AccountId(id + 100),
            role,
            short_display_name: short_name.to_string(),
            long_display_name: short_name.to_string(),
        });
        self
    }

    pub fn patient(self, id: i64, first_name: &str, last_name: &str) -> Self {
        self.store.add_patient(PatientProfile {
            id: PatientId(id),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        });
        self
    }

    pub fn case(self, id: i64, patient_id: i64, name: &str) -> Self {
        self.store.add_case(CaseProfile {
            id: CaseId(id),
            patient_id: PatientId(patient_id),
            name: name.to_string(),
        });
        self
    }

    pub fn on_care_team(self, case_id: i64, provider_id: i64, role: Role) -> Self {
        self.store
            .assign_to_care_team(CaseId(case_id), ProviderId(provider_id), role);
        self
    }

    pub fn licensed(self, region: &str, providers: &[i64]) -> Self {
        let region = Region::new(region);
        for provider_id in providers {
            self.store.license_provider(&region, ProviderId(*provider_id));
        }
        self
    }

    /// Puts a case into the jump-ball pool as if it had been charged
    /// `minutes_ago`.
    pub async fn pool_case(
        &self,
        case_id: i64,
        patient_id: i64,
        region: &str,
        minutes_ago: i64,
    ) -> anyhow::Result<()> {
        self.store
            .insert_unclaimed(UnclaimedCase {
                case_id: CaseId(case_id),
                patient_id: PatientId(patient_id),
                visit_id: case_id * 10,
                region: Region::new(region),
                description: format!("New visit for case {case_id}"),
                short_description: "New visit".to_string(),
                tags: Vec::new(),
                enqueued_at: Utc::now() - Duration::minutes(minutes_ago),
            })
            .await?;
        Ok(())
    }

    pub fn claim_engine(&self) -> ClaimEngine<InMemoryCareStore> {
        ClaimEngine::new(self.store(), ClaimConfig::default())
    }

    /// Router over the fixture store with the standard rule table.
    pub fn router(
        &self,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<CaseRouter<InMemoryCareStore, InMemoryCareStore, InMemoryCareStore>> {
        self.router_with_queue(self.store(), notifier)
    }

    /// Router whose queue writes go through `queue`, with claims and
    /// lookups served by the fixture store.
    pub fn router_with_queue<Q: QueueStore + 'static>(
        &self,
        queue: Arc<Q>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<CaseRouter<Q, InMemoryCareStore, InMemoryCareStore>> {
        Arc::new(CaseRouter::new(
            RuleTable::standard(),
            queue,
            self.claim_engine(),
            self.store(),
            notifier,
            RoutingConfig::default(),
        ))
    }

    /// Notifier worker over the fixture store with a fixed RNG seed.
    pub fn notifier_worker(
        &self,
        config: NotifierConfig,
        notifier: Arc<dyn Notifier>,
        lease: Arc<dyn WorkerLease>,
    ) -> anyhow::Result<
        UnclaimedCaseNotifier<InMemoryCareStore, InMemoryCareStore, InMemoryCareStore>,
    > {
        NotifierBuilder::new(config)
            .with_claims(self.store())
            .with_notify_state(self.store())
            .with_directory(self.store())
            .with_notifier(notifier)
            .with_lease(lease)
            .with_seed(7)
            .build()
    }
}
