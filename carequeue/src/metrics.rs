//! Prometheus metrics instrumentation for carequeue.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `carequeue_routes_total` - Domain events routed, by kind and outcome
//! - `carequeue_queue_transitions_total` - Queue rows touched, by action and outcome
//! - `carequeue_claims_total` - Claim operations, by action and result
//! - `carequeue_notifications_failed_total` - Notifications that could not be delivered
//! - `carequeue_no_provider_found_total` - Notifier picks that found nobody, by region
//!
//! ## Histograms
//! - `carequeue_notifier_cycle_duration_seconds` - Notifier cycle duration, by status
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for carequeue metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for routed domain events.
///
/// Labels:
/// - `event_kind`: The domain event kind
/// - `outcome`: `success` or `failure`
pub static ROUTES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("carequeue_routes_total", "Total number of domain events routed");
    CounterVec::new(opts, &["event_kind", "outcome"])
        .expect("carequeue_routes_total metric creation failed")
});

/// Counter for queue rows touched by transition batches.
///
/// Labels:
/// - `action`: `insert`, `remove` or `replace`
/// - `outcome`: `applied`, `deduplicated` or `precondition_miss`
pub static QUEUE_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "carequeue_queue_transitions_total",
        "Total number of queue transitions processed",
    );
    CounterVec::new(opts, &["action", "outcome"])
        .expect("carequeue_queue_transitions_total metric creation failed")
});

/// Counter for jump-ball claim operations.
///
/// Labels:
/// - `action`: `claim`, `extend` or `finalize`
/// - `result`: e.g. `claimed`, `already_claimed`, `lost_race`
pub static CLAIMS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("carequeue_claims_total", "Total number of claim operations");
    CounterVec::new(opts, &["action", "result"])
        .expect("carequeue_claims_total metric creation failed")
});

/// Counter for failed notifications.
///
/// Labels:
/// - `source`: `router` or `notifier`
pub static NOTIFICATIONS_FAILED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "carequeue_notifications_failed_total",
        "Total number of notifications that could not be delivered",
    );
    CounterVec::new(opts, &["source"])
        .expect("carequeue_notifications_failed_total metric creation failed")
});

/// Counter for regions where the picker found nobody to notify.
///
/// Labels:
/// - `region`: Care-providing region code
pub static NO_PROVIDER_FOUND_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "carequeue_no_provider_found_total",
        "Total number of notifier picks that found no eligible provider",
    );
    CounterVec::new(opts, &["region"])
        .expect("carequeue_no_provider_found_total metric creation failed")
});

/// Histogram for notifier cycle duration in seconds.
///
/// Labels:
/// - `status`: `completed`, `failed` or `skipped`
pub static NOTIFIER_CYCLE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "carequeue_notifier_cycle_duration_seconds",
        "Unclaimed-case notifier cycle duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["status"])
        .expect("carequeue_notifier_cycle_duration_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// Calling it more than once is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(ROUTES_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(QUEUE_TRANSITIONS_TOTAL.clone()),
        Box::new(CLAIMS_TOTAL.clone()),
        Box::new(NOTIFICATIONS_FAILED_TOTAL.clone()),
        Box::new(NO_PROVIDER_FOUND_TOTAL.clone()),
        Box::new(NOTIFIER_CYCLE_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_route(event_kind: &str, outcome: &str) {
    ROUTES_TOTAL.with_label_values(&[event_kind, outcome]).inc();
}

/// Adds `count` rows to the transition counter; zero counts are skipped.
pub fn record_transitions(action: &str, outcome: &str, count: usize) {
    if count > 0 {
        QUEUE_TRANSITIONS_TOTAL
            .with_label_values(&[action, outcome])
            .inc_by(count as f64);
    }
}

pub fn record_claim(action: &str, result: &str) {
    CLAIMS_TOTAL.with_label_values(&[action, result]).inc();
}

pub fn record_notification_failed(source: &str) {
    NOTIFICATIONS_FAILED_TOTAL.with_label_values(&[source]).inc();
}

pub fn record_no_provider_found(region: &str) {
    NO_PROVIDER_FOUND_TOTAL.with_label_values(&[region]).inc();
}

pub fn observe_notifier_cycle(status: &str, duration_secs: f64) {
    NOTIFIER_CYCLE_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
