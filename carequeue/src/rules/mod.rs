//! Routing rules: one per event kind, each turning a domain event into a
//! [`RoutingPlan`].
//!
//! Rules only read from the [`Directory`]; every write they want is
//! described in the plan and carried out by
//! [`CaseRouter`](crate::routing::CaseRouter).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::claim::UnclaimedCase;
use crate::config::RoutingConfig;
use crate::directory::Directory;
use crate::error::RoutingError;
use crate::events::{DomainEvent, EventKind};
use crate::item::{CaseId, EventType, ItemKey, ItemStatus, ProviderId};
use crate::notify::OutboundNotification;
use crate::transition::QueueTransition;

mod jump_ball;
mod messaging;
mod prescription;
mod visit;

pub use jump_ball::{ClaimExtensionRule, VisitOpenedRule};
pub use messaging::{CaseAssignedRule, MessagePostedRule, ScheduledMessageCancelledRule};
pub use prescription::{
    RefillRequestCreatedRule, RefillRequestResolvedRule, RxTransmissionErrorResolvedRule,
    RxTransmissionErrorRule,
};
pub use visit::{TreatmentPlanSubmittedRule, VisitChargedRule, VisitMarkedUnsuitableRule};

/// One provider's batch of queue transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    pub provider_id: ProviderId,
    pub transitions: Vec<QueueTransition>,
}

/// Claim-engine operation requested by a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClaimAction {
    /// Put a case into its region's jump-ball pool.
    MakeAvailable(UnclaimedCase),
    /// Temporary claim with the configured lease.
    Claim { provider_id: ProviderId, case_id: CaseId },
    Extend { provider_id: ProviderId, case_id: CaseId },
    Finalize { provider_id: ProviderId, case_id: CaseId },
}

impl ClaimAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimAction::MakeAvailable(_) => "make_available",
            ClaimAction::Claim { .. } => "claim",
            ClaimAction::Extend { .. } => "extend",
            ClaimAction::Finalize { .. } => "finalize",
        }
    }
}

/// Everything a rule wants done for one event, in execution order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub queue_updates: Vec<QueueUpdate>,
    pub claim_actions: Vec<ClaimAction>,
    pub notifications: Vec<OutboundNotification>,
    pub follow_ups: Vec<DomainEvent>,
}

impl RoutingPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue_updates.is_empty()
            && self.claim_actions.is_empty()
            && self.notifications.is_empty()
            && self.follow_ups.is_empty()
    }

    pub fn update(
        &mut self,
        provider_id: ProviderId,
        transitions: Vec<QueueTransition>,
    ) -> &mut Self {
        self.queue_updates.push(QueueUpdate {
            provider_id,
            transitions,
        });
        self
    }

    pub fn claim(&mut self, action: ClaimAction) -> &mut Self {
        self.claim_actions.push(action);
        self
    }

    pub fn notify(&mut self, notification: OutboundNotification) -> &mut Self {
        self.notifications.push(notification);
        self
    }

    pub fn follow_up(&mut self, event: DomainEvent) -> &mut Self {
        self.follow_ups.push(event);
        self
    }
}

/// Read-only inputs available to a rule.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub directory: &'a dyn Directory,
    pub config: &'a RoutingConfig,
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

/// Maps one event kind to the work it causes.
#[async_trait]
pub trait RoutingRule: Send + Sync {
    fn kind(&self) -> EventKind;

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan>;
}

/// Immutable event kind to rule mapping.
#[derive(Clone)]
pub struct RuleTable {
    rules: HashMap<EventKind, Arc<dyn RoutingRule>>,
}

impl fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl RuleTable {
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::default()
    }

    /// The production rule set, covering every [`EventKind`].
    pub fn standard() -> Self {
        let rules: Vec<Arc<dyn RoutingRule>> = vec![
            Arc::new(VisitChargedRule),
            Arc::new(VisitOpenedRule),
            Arc::new(ClaimExtensionRule::new(EventKind::DiagnosisModified)),
            Arc::new(ClaimExtensionRule::new(EventKind::TreatmentPlanModified)),
            Arc::new(TreatmentPlanSubmittedRule),
            Arc::new(VisitMarkedUnsuitableRule),
            Arc::new(RxTransmissionErrorRule),
            Arc::new(RxTransmissionErrorResolvedRule),
            Arc::new(RefillRequestCreatedRule),
            Arc::new(RefillRequestResolvedRule),
            Arc::new(MessagePostedRule),
            Arc::new(CaseAssignedRule),
            Arc::new(ScheduledMessageCancelledRule),
        ];
        Self {
            rules: rules.into_iter().map(|rule| (rule.kind(), rule)).collect(),
        }
    }

    pub fn rule_for(&self, kind: EventKind) -> Result<&Arc<dyn RoutingRule>, RoutingError> {
        self.rules
            .get(&kind)
            .ok_or(RoutingError::NoRuleForEvent(kind))
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<_> = self.rules.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Collects rules for a custom [`RuleTable`].
#[derive(Default)]
pub struct RuleTableBuilder {
    rules: Vec<Arc<dyn RoutingRule>>,
}

impl fmt::Debug for RuleTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleTableBuilder")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl RuleTableBuilder {
    pub fn with_rule(mut self, rule: Arc<dyn RoutingRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// # Errors
    ///
    /// Returns [`RoutingError::DuplicateRule`] when two rules claim the same
    /// kind.
    pub fn build(self) -> Result<RuleTable, RoutingError> {
        let mut rules = HashMap::with_capacity(self.rules.len());
        for rule in self.rules {
            let kind = rule.kind();
            if rules.insert(kind, rule).is_some() {
                return Err(RoutingError::DuplicateRule(kind));
            }
        }
        Ok(RuleTable { rules })
    }
}

pub(crate) fn unexpected(expected: EventKind, event: &DomainEvent) -> anyhow::Error {
    RoutingError::UnexpectedEvent {
        expected,
        found: event.kind(),
    }
    .into()
}

pub(crate) fn remove(
    provider_id: ProviderId,
    item_id: i64,
    event_type: EventType,
    status: ItemStatus,
) -> QueueTransition {
    QueueTransition::remove(ItemKey::new(provider_id, item_id, event_type, status))
}
