//! Tracing and telemetry instrumentation for carequeue.
//!
//! This module provides helper functions for creating tracing spans and recording
//! metrics around queue batches, routing, claims and the notifier worker. All
//! functions work both with and without the `metrics` feature flag.
//!
//! # Example
//!
//! ```ignore
//! use carequeue::telemetry::{route_span, record_route};
//!
//! let span = route_span("VISIT_CHARGED");
//! let _enter = span.enter();
//! // ... apply the routing plan
//! record_route("VISIT_CHARGED", "success");
//! ```

use std::fmt::Display;
use std::future::Future;

use tracing::{info_span, Instrument, Span};

use crate::transition::TransitionOutcome;

/// Create a tracing span for applying a transition batch.
///
/// # Arguments
/// * `provider_id` - Provider whose queue is mutated
/// * `batch_len` - Number of transitions in the batch
#[must_use]
pub fn apply_span(provider_id: impl Display, batch_len: usize) -> Span {
    info_span!(
        "carequeue.apply",
        provider_id = %provider_id,
        batch_len = batch_len,
    )
}

/// Create a tracing span for routing one domain event.
#[must_use]
pub fn route_span(event_kind: impl AsRef<str>) -> Span {
    info_span!("carequeue.route", event_kind = %event_kind.as_ref())
}

/// Create a tracing span for a claim operation.
///
/// # Arguments
/// * `provider_id` - Provider acting on the claim
/// * `case_id` - Case being claimed
/// * `action` - One of `claim`, `extend`, `finalize`
#[must_use]
pub fn claim_span(provider_id: impl Display, case_id: impl Display, action: &str) -> Span {
    info_span!(
        "carequeue.claim",
        provider_id = %provider_id,
        case_id = %case_id,
        action = action,
    )
}

/// Create a tracing span for picking a provider to notify in a region.
#[must_use]
pub fn pick_span(region: impl Display, regions_to_avoid: usize) -> Span {
    info_span!(
        "carequeue.pick",
        region = %region,
        regions_to_avoid = regions_to_avoid,
    )
}

/// Create a tracing span for one notifier cycle.
#[must_use]
pub fn notify_cycle_span(holder: impl AsRef<str>) -> Span {
    info_span!("carequeue.notify_cycle", holder = %holder.as_ref())
}

/// Instrument a future with a routing span.
pub fn instrument_route<F>(event_kind: impl AsRef<str>, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(route_span(event_kind))
}

/// Record what a transition batch did.
pub fn record_transitions_applied(provider_id: impl Display, outcome: &TransitionOutcome) {
    tracing::debug!(
        provider_id = %provider_id,
        inserted = outcome.inserted,
        removed = outcome.removed,
        replaced = outcome.replaced,
        deduplicated = outcome.deduplicated,
        precondition_misses = outcome.precondition_misses,
        "queue transitions applied"
    );

    #[cfg(feature = "metrics")]
    {
        crate::metrics::record_transitions("insert", "applied", outcome.inserted);
        crate::metrics::record_transitions("insert", "deduplicated", outcome.deduplicated);
        crate::metrics::record_transitions("remove", "applied", outcome.removed);
        crate::metrics::record_transitions("replace", "applied", outcome.replaced);
        crate::metrics::record_transitions(
            "replace",
            "precondition_miss",
            outcome.precondition_misses,
        );
    }
}

/// Record the outcome of routing one event.
///
/// # Arguments
/// * `event_kind` - Kind of the routed event
/// * `outcome` - `success` or `failure`
pub fn record_route(event_kind: impl AsRef<str>, outcome: impl AsRef<str>) {
    tracing::info!(
        event_kind = %event_kind.as_ref(),
        outcome = %outcome.as_ref(),
        "event routed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_route(event_kind.as_ref(), outcome.as_ref());
}

/// Record the result of a claim operation.
pub fn record_claim(action: &str, result: &str) {
    tracing::debug!(action = action, result = result, "claim operation");

    #[cfg(feature = "metrics")]
    crate::metrics::record_claim(action, result);
}

/// Record a notification that could not be delivered.
///
/// Delivery failures never roll back queue state; they are only counted.
pub fn record_notification_failed(source: &str, provider_id: impl Display, error: &anyhow::Error) {
    tracing::warn!(
        source = source,
        provider_id = %provider_id,
        error = %error,
        "notification failed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_notification_failed(source);
}

/// Record a region for which no provider could be notified.
pub fn record_no_provider_found(region: impl Display) {
    tracing::warn!(region = %region, "no provider found to notify");

    #[cfg(feature = "metrics")]
    crate::metrics::record_no_provider_found(&region.to_string());
}

/// Record the start of a notifier cycle for duration tracking.
pub fn record_cycle_start(holder: impl AsRef<str>) -> CycleTimingHandle {
    CycleTimingHandle {
        holder: holder.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Record the end of a notifier cycle.
///
/// # Arguments
/// * `handle` - The timing handle from `record_cycle_start`
/// * `status` - `completed`, `failed` or `skipped`
pub fn record_cycle_end(handle: CycleTimingHandle, status: &str) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    tracing::info!(
        holder = %handle.holder,
        status = status,
        duration_secs = duration_secs,
        "notifier cycle finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_notifier_cycle(status, duration_secs);
}

/// Handle for tracking notifier cycle duration.
#[derive(Debug)]
pub struct CycleTimingHandle {
    holder: String,
    start: std::time::Instant,
}

impl CycleTimingHandle {
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
