//! End-to-end routing tests: domain events published through the
//! dispatcher and observed in provider queues.

use std::sync::Arc;

use carequeue::*;
use carequeue_testkit::{CareFixture, RecordingNotifier, RecordingQueueStore};

const DOCTOR: i64 = 10;
const MA: i64 = 20;
const OTHER_DOCTOR: i64 = 11;
const PATIENT: i64 = 30;
const CASE: i64 = 40;

fn fixture() -> CareFixture {
    CareFixture::new()
        .doctor(DOCTOR, "Dr. Kohen")
        .doctor(OTHER_DOCTOR, "Dr. Ortiz")
        .care_coordinator(MA, "Sam")
        .patient(PATIENT, "Ada", "Lovelace")
        .case(CASE, PATIENT, "Acne")
}

fn assignment(automated: bool) -> DomainEvent {
    DomainEvent::CaseAssigned(CaseAssigned {
        case_id: CaseId(CASE),
        assigned_by: ProviderId(MA),
        assigned_to: ProviderId(DOCTOR),
        automated,
    })
}

fn dispatcher_for<Q, C, D>(router: &Arc<CaseRouter<Q, C, D>>) -> Dispatcher
where
    Q: QueueStore + 'static,
    C: ClaimStore + 'static,
    D: Directory + 'static,
{
    let mut builder = Dispatcher::builder();
    router.register(&mut builder);
    builder.build()
}

#[tokio::test]
async fn test_coordinator_assignment_updates_queues_in_order() {
    let fixture = fixture();
    let store = fixture.store();
    let queue = Arc::new(RecordingQueueStore::new(Arc::clone(&store)));
    let notifier = Arc::new(RecordingNotifier::new());
    let router = fixture.router_with_queue(Arc::clone(&queue), notifier.clone());

    dispatcher_for(&router)
        .publish(&assignment(false))
        .await
        .unwrap();

    let batches = queue.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].provider_id, ProviderId(MA));
    assert_eq!(
        batches[0].actions,
        vec![
            TransitionAction::Remove,
            TransitionAction::Remove,
            TransitionAction::Insert,
        ]
    );
    assert_eq!(batches[1].provider_id, ProviderId(DOCTOR));
    assert_eq!(batches[1].actions, vec![TransitionAction::Insert]);

    let history = store.completed_items(ProviderId(MA)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, EventType::CaseAssignment);
    assert_eq!(history[0].status, ItemStatus::Replied);
    assert_eq!(history[0].description, "Sam assigned Ada Lovelace's case to Dr. Kohen");

    let pending = store.pending_items(ProviderId(DOCTOR)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].short_description, "Reassigned by Sam");
    assert_eq!(pending[0].position_in_queue, Some(1));

    assert_eq!(
        notifier.sent_to(ProviderId(DOCTOR)),
        vec![NotificationMessage::CaseAssigned]
    );
}

#[tokio::test]
async fn test_repeated_assignment_leaves_one_pending_item() {
    let fixture = fixture();
    let store = fixture.store();
    let router = fixture.router(Arc::new(RecordingNotifier::new()));
    let mut outcomes = router.subscribe_outcomes();
    let dispatcher = dispatcher_for(&router);

    dispatcher.publish(&assignment(false)).await.unwrap();
    dispatcher.publish(&assignment(false)).await.unwrap();

    let first = outcomes.recv().await.unwrap();
    let second = outcomes.recv().await.unwrap();
    assert_eq!(first.transitions.deduplicated, 0);
    assert_eq!(second.transitions.deduplicated, 1);

    let pending = store.pending_items(ProviderId(DOCTOR)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, EventType::CaseAssignment);
}

#[tokio::test]
async fn test_doctor_reply_clears_assignment_and_message() {
    let fixture = fixture().on_care_team(CASE, DOCTOR, Role::Doctor);
    let store = fixture.store();
    let router = fixture.router(Arc::new(RecordingNotifier::new()));
    let dispatcher = dispatcher_for(&router);

    dispatcher.publish(&assignment(false)).await.unwrap();
    dispatcher
        .publish(&DomainEvent::MessagePosted(MessagePosted {
            case_id: CaseId(CASE),
            sender_role: Role::Patient,
            sender_id: PATIENT,
            automated: false,
        }))
        .await
        .unwrap();
    assert_eq!(store.pending_items(ProviderId(DOCTOR)).await.unwrap().len(), 2);

    dispatcher
        .publish(&DomainEvent::MessagePosted(MessagePosted {
            case_id: CaseId(CASE),
            sender_role: Role::Doctor,
            sender_id: DOCTOR,
            automated: false,
        }))
        .await
        .unwrap();

    assert!(store.pending_items(ProviderId(DOCTOR)).await.unwrap().is_empty());
    let history = store.completed_items(ProviderId(DOCTOR)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].short_description, "Messaged by Dr. Kohen");
}

#[tokio::test]
async fn test_unassigned_visit_goes_through_the_pool_to_a_doctor() {
    let fixture = fixture()
        .on_care_team(CASE, MA, Role::CareCoordinator)
        .licensed("CA", &[DOCTOR, OTHER_DOCTOR]);
    let store = fixture.store();
    let notifier = Arc::new(RecordingNotifier::new());
    let router = fixture.router(notifier.clone());
    let dispatcher = dispatcher_for(&router);

    dispatcher
        .publish(&DomainEvent::VisitCharged(VisitCharged {
            patient_id: PatientId(PATIENT),
            case_id: CaseId(CASE),
            visit_id: 700,
            region: Region::new("CA"),
        }))
        .await
        .unwrap();

    let global = store
        .unclaimed_eligible_items(ProviderId(OTHER_DOCTOR))
        .await
        .unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].item_id, 700);

    dispatcher
        .publish(&DomainEvent::VisitOpened(VisitOpened {
            provider_id: ProviderId(DOCTOR),
            patient_id: PatientId(PATIENT),
            case_id: CaseId(CASE),
            visit_id: 700,
        }))
        .await
        .unwrap();

    assert_eq!(
        router.claims().claim_status(CaseId(CASE)).await.unwrap(),
        Some(ClaimStatus::TemporarilyClaimed)
    );
    assert!(store
        .unclaimed_eligible_items(ProviderId(OTHER_DOCTOR))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .unclaimed_eligible_items(ProviderId(DOCTOR))
            .await
            .unwrap()
            .len(),
        1
    );

    dispatcher
        .publish(&DomainEvent::TreatmentPlanSubmitted(TreatmentPlanSubmitted {
            doctor_id: ProviderId(DOCTOR),
            patient_id: PatientId(PATIENT),
            case_id: CaseId(CASE),
            visit_id: 700,
            treatment_plan_id: 900,
        }))
        .await
        .unwrap();

    assert_eq!(
        router.claims().claim_status(CaseId(CASE)).await.unwrap(),
        Some(ClaimStatus::PermanentlyAssigned)
    );
    let team = store.care_team(CaseId(CASE)).await.unwrap();
    assert_eq!(team.active_doctor(), Some(ProviderId(DOCTOR)));
    assert_eq!(
        notifier.sent_to(ProviderId(MA)),
        vec![NotificationMessage::TreatmentPlanCreated]
    );

    let history = store.completed_items(ProviderId(DOCTOR)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ItemStatus::Treated);
}

#[tokio::test]
async fn test_unsuitable_visit_follow_up_is_routed_as_doctor_reply() {
    let fixture = fixture()
        .on_care_team(CASE, DOCTOR, Role::Doctor)
        .on_care_team(CASE, MA, Role::CareCoordinator);
    let store = fixture.store();
    let router = fixture.router(Arc::new(RecordingNotifier::new()));
    let mut outcomes = router.subscribe_outcomes();
    let dispatcher = dispatcher_for(&router);

    dispatcher
        .publish(&DomainEvent::VisitMarkedUnsuitable(VisitMarkedUnsuitable {
            doctor_id: ProviderId(DOCTOR),
            patient_id: PatientId(PATIENT),
            case_id: CaseId(CASE),
            visit_id: 700,
            reason: "needs an in-person exam".into(),
        }))
        .await
        .unwrap();

    let triaged = outcomes.recv().await.unwrap();
    assert_eq!(triaged.kind, EventKind::VisitMarkedUnsuitable);
    assert_eq!(triaged.follow_ups.len(), 1);

    let reply = tokio::time::timeout(std::time::Duration::from_secs(1), outcomes.recv())
        .await
        .expect("follow-up should be routed")
        .unwrap();
    assert_eq!(reply.kind, EventKind::MessagePosted);

    let pending = store.pending_items(ProviderId(MA)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, EventType::CaseAssignment);
}
