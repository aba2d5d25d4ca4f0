/// PostgreSQL persistence for queues, claims, notify state and the
/// notifier lease.
///
/// This module provides [`PgCareStore`], implementing the queue, claim and
/// notify-state backends, and [`PgAdvisoryLease`] for electing one notifier
/// across service instances.
pub mod postgres;

pub use postgres::{connect, PgAdvisoryLease, PgCareStore};
