//! Carequeue - work queues and case routing for care providers.
//!
//! Every provider (doctor or care coordinator) has a queue of work items.
//! Clinical domain events are turned into queue changes, jump-ball claims on
//! unassigned cases and provider notifications.
//!
//! # Core Concepts
//!
//! - **Queue items**: A [`QueueItem`] is one row in a provider's queue,
//!   identified by (provider, item id, [`EventType`], [`ItemStatus`]). The
//!   [`QueueStore`] trait applies [`QueueTransition`] batches atomically per
//!   provider.
//!
//! - **Routing**: Each [`EventKind`] has one [`RoutingRule`] that reads the
//!   [`Directory`] and returns a [`RoutingPlan`]. The [`CaseRouter`] carries
//!   plans out and publishes a [`RoutingOutcome`] per event.
//!
//! - **Jump ball**: Charged visits whose patient has no doctor enter a pool of
//!   unclaimed cases. [`ClaimEngine`] moves them through temporary claims to
//!   permanent assignment with compare-and-swap semantics.
//!
//! - **Notifier**: The [`UnclaimedCaseNotifier`] periodically picks one
//!   licensed provider per waiting region with [`NotifyPicker`], holding a
//!   [`WorkerLease`] so only one instance notifies.
//!
//! - **Display**: [`QueueView`] renders the local, global and history tabs
//!   with patient names joined in.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL persistence support via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use carequeue::*;
//!
//! let store = Arc::new(InMemoryCareStore::new());
//! let router = Arc::new(CaseRouter::new(
//!     RuleTable::standard(),
//!     Arc::clone(&store),
//!     ClaimEngine::new(Arc::clone(&store), ClaimConfig::default()),
//!     Arc::clone(&store),
//!     Arc::new(TracingNotifier),
//!     RoutingConfig::default(),
//! ));
//! let mut builder = Dispatcher::builder();
//! router.register(&mut builder);
//! let dispatcher = builder.build();
//! ```

/// Deep-link actions attached to queue items.
pub mod action;

/// Jump-ball claims on unassigned cases.
///
/// The `claim` module provides the [`ClaimStore`] backend trait and the
/// [`ClaimEngine`] that enforces claim transitions.
pub mod claim;

/// Configuration structures for persistence, claims, the notifier and routing.
pub mod config;

/// Read-only lookups of providers, patients, cases and care teams.
pub mod directory;

/// Client-facing rendering of queue tabs.
pub mod display;

/// Typed errors for queue, routing and configuration failures.
pub mod error;

/// Domain events, routing outcomes and the in-process dispatcher.
///
/// The `events` module provides:
/// - [`DomainEvent`] and one payload type per [`EventKind`]
/// - [`Dispatcher`] for fan-out to [`EventHandler`]s
/// - [`OutcomeBus`] broadcasting every [`RoutingOutcome`]
pub mod events;

/// Queue item identity, ids and wire enums.
pub mod item;

/// Single-holder leases for background workers.
pub mod lease;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Outbound provider notifications.
pub mod notify;

/// Fair provider selection for unclaimed-case notifications.
pub mod picker;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides PostgreSQL-backed implementations of
/// the queue, claim and notify-state stores when the `postgres` feature is
/// enabled.
pub mod persistence;

/// The queue backend trait.
pub mod queue;

/// Execution of routing plans.
pub mod routing;

/// Per-event routing rules.
pub mod rules;

/// Background workers and shutdown signalling.
///
/// The `runtime` module provides:
/// - [`UnclaimedCaseNotifier`] - the periodic notifier worker
/// - [`NotifierBuilder`] - wiring for the notifier
/// - [`ShutdownToken`] - graceful shutdown signaling
pub mod runtime;

/// Storage backends.
pub mod store;

/// Tracing spans and metric recording helpers.
pub mod telemetry;

/// Queue transitions and batch application.
pub mod transition;

pub use action::*;
pub use claim::*;
pub use config::*;
pub use directory::*;
pub use display::*;
pub use error::*;
pub use events::*;
pub use item::*;
pub use lease::*;
pub use notify::*;
pub use picker::*;
pub use queue::*;
pub use routing::*;
pub use rules::{
    ClaimAction, QueueUpdate, RoutingPlan, RoutingRule, RuleContext, RuleTable, RuleTableBuilder,
};
pub use runtime::{CycleReport, NotifierBuilder, NotifierState, ShutdownToken, UnclaimedCaseNotifier};
pub use store::InMemoryCareStore;
pub use transition::*;
