//! Unclaimed-case notifier worker tests.

use std::sync::Arc;
use std::time::Duration;

use carequeue::*;
use carequeue_testkit::{CareFixture, RecordingNotifier, ScriptedLease};

/// Cases waiting in CA (oldest), NY and TX. Providers 1, 2 and 3 are each
/// licensed in one region; provider 4 is licensed everywhere.
async fn three_regions() -> CareFixture {
    let fixture = CareFixture::new()
        .doctor(1, "Dr. Adams")
        .doctor(2, "Dr. Baker")
        .doctor(3, "Dr. Chen")
        .doctor(4, "Dr. Diaz")
        .licensed("CA", &[1, 4])
        .licensed("NY", &[2, 4])
        .licensed("TX", &[3, 4]);
    fixture.pool_case(100, 500, "CA", 30).await.unwrap();
    fixture.pool_case(200, 501, "NY", 20).await.unwrap();
    fixture.pool_case(300, 502, "TX", 10).await.unwrap();
    fixture
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> NotifierConfig {
    NotifierConfig {
        lease_poll_interval_ms: 10,
        shutdown_timeout_secs: 5,
        ..NotifierConfig::default()
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_cycle_spreads_notifications_across_regions() {
    let fixture = three_regions().await;
    let notifier = Arc::new(RecordingNotifier::new());
    let worker = fixture
        .notifier_worker(
            NotifierConfig::default(),
            notifier.clone(),
            Arc::new(ScriptedLease::new("node-1")),
        )
        .unwrap();

    let report = worker.run_cycle().await.unwrap();

    assert_eq!(
        report.regions,
        vec![Region::new("CA"), Region::new("NY"), Region::new("TX")]
    );
    assert_eq!(report.notified.len(), 3);
    let (ca, ca_provider) = &report.notified[0];
    assert_eq!(ca, &Region::new("CA"));
    assert!([ProviderId(1), ProviderId(4)].contains(ca_provider));
    assert_eq!(report.notified[1], (Region::new("NY"), ProviderId(2)));
    assert_eq!(report.notified[2], (Region::new("TX"), ProviderId(3)));

    let sent = notifier.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent
        .iter()
        .all(|n| n.message == NotificationMessage::UnclaimedCase && n.role == Role::Doctor));
    assert_eq!(sent[1].account_id, AccountId(102));
}

#[tokio::test]
async fn test_second_cycle_is_region_rate_limited() {
    let fixture = three_regions().await;
    let notifier = Arc::new(RecordingNotifier::new());
    let worker = fixture
        .notifier_worker(
            NotifierConfig::default(),
            notifier.clone(),
            Arc::new(ScriptedLease::new("node-1")),
        )
        .unwrap();

    worker.run_cycle().await.unwrap();
    let report = worker.run_cycle().await.unwrap();

    assert!(report.notified.is_empty());
    assert_eq!(report.rate_limited.len(), 3);
    notifier.assert_sent_count_eq(3);
}

#[tokio::test]
async fn test_failed_delivery_is_not_recorded() {
    let fixture = three_regions().await;
    let notifier = Arc::new(RecordingNotifier::new());
    notifier.fail_for(ProviderId(2));
    let worker = fixture
        .notifier_worker(
            NotifierConfig::default(),
            notifier.clone(),
            Arc::new(ScriptedLease::new("node-1")),
        )
        .unwrap();

    let report = worker.run_cycle().await.unwrap();

    assert_eq!(report.notification_failures, 1);
    assert_eq!(report.notified.len(), 2);
    let store = fixture.store();
    assert_eq!(store.provider_last_notified(ProviderId(2)), None);
    assert!(store.provider_last_notified(ProviderId(3)).is_some());

    notifier.recover();
    let retry = worker.run_cycle().await.unwrap();
    assert_eq!(retry.notified, vec![(Region::new("NY"), ProviderId(2))]);
}

#[tokio::test]
async fn test_region_without_licensed_provider_is_reported() {
    let fixture = CareFixture::new().doctor(1, "Dr. Adams").licensed("CA", &[1]);
    fixture.pool_case(100, 500, "WA", 5).await.unwrap();
    let worker = fixture
        .notifier_worker(
            NotifierConfig::default(),
            Arc::new(RecordingNotifier::new()),
            Arc::new(ScriptedLease::new("node-1")),
        )
        .unwrap();

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.no_provider, vec![Region::new("WA")]);
}

#[tokio::test]
async fn test_start_and_stop_release_the_lease() {
    init_tracing();
    let fixture = three_regions().await;
    let notifier = Arc::new(RecordingNotifier::new());
    let lease = ScriptedLease::new("node-1").with_extend_script([false]);
    let worker = Arc::new(
        fixture
            .notifier_worker(fast_config(), notifier.clone(), Arc::new(lease.clone()))
            .unwrap(),
    );
    assert_eq!(worker.state(), NotifierState::Idle);

    worker.start().await.unwrap();
    assert_eq!(worker.state(), NotifierState::Running);
    assert!(worker.start().await.is_err());

    wait_until(|| notifier.sent().len() == 3).await;
    worker.stop().await.unwrap();

    assert_eq!(worker.state(), NotifierState::Stopped);
    assert_eq!(lease.acquire_count(), 1);
    assert_eq!(lease.release_count(), 1);
}

#[tokio::test]
async fn test_only_lease_holder_runs_cycles() {
    init_tracing();
    let fixture = three_regions().await;
    let registry = LeaseRegistry::new();
    let lease = |holder: &str| -> Arc<dyn WorkerLease> {
        Arc::new(
            LocalLease::new(
                registry.clone(),
                "unclaimed-case-notifier",
                holder,
                Duration::from_secs(60),
            )
            .with_poll_interval(Duration::from_millis(10)),
        )
    };

    let notifier_a = Arc::new(RecordingNotifier::new());
    let notifier_b = Arc::new(RecordingNotifier::new());
    let worker_a = Arc::new(
        fixture
            .notifier_worker(fast_config(), notifier_a.clone(), lease("node-a"))
            .unwrap(),
    );
    let worker_b = Arc::new(
        fixture
            .notifier_worker(fast_config(), notifier_b.clone(), lease("node-b"))
            .unwrap(),
    );

    worker_a.start().await.unwrap();
    wait_until(|| notifier_a.sent().len() == 3).await;
    worker_b.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        registry.grant("unclaimed-case-notifier").map(|g| g.holder),
        Some("node-a".to_string())
    );
    notifier_b.assert_sent_count_eq(0);

    worker_a.stop().await.unwrap();
    wait_until(|| {
        registry.grant("unclaimed-case-notifier").map(|g| g.holder) == Some("node-b".to_string())
    })
    .await;

    worker_b.stop().await.unwrap();
    assert_eq!(worker_b.state(), NotifierState::Stopped);
    assert!(registry.grant("unclaimed-case-notifier").is_none());
}
