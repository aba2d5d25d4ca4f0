//! Executes routing plans against the queue, claim and notification
//! backends.
//!
//! [`CaseRouter`] looks up the rule for an event, asks it for a
//! [`RoutingPlan`](crate::rules::RoutingPlan) and carries the plan out:
//! queue batches in order, then claim actions, then notifications. Queue and
//! claim failures abort the event; notification failures are counted and
//! logged. Follow-up events go back through the [`Dispatcher`].

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::claim::{ClaimEngine, ClaimStore};
use crate::config::RoutingConfig;
use crate::directory::Directory;
use crate::events::{DispatcherBuilder, Dispatcher, DomainEvent, EventHandler, OutcomeBus, RoutingOutcome};
use crate::notify::Notifier;
use crate::queue::QueueStore;
use crate::rules::{ClaimAction, RuleContext, RuleTable};
use crate::telemetry;

/// Routes domain events into provider queues.
pub struct CaseRouter<Q, C, D>
where
    Q: QueueStore + 'static,
    C: ClaimStore + 'static,
    D: Directory + 'static,
{
    table: RuleTable,
    queue: Arc<Q>,
    claims: ClaimEngine<C>,
    directory: Arc<D>,
    notifier: Arc<dyn Notifier>,
    config: RoutingConfig,
    outcomes: OutcomeBus,
}

impl<Q, C, D> fmt::Debug for CaseRouter<Q, C, D>
where
    Q: QueueStore + 'static,
    C: ClaimStore + 'static,
    D: Directory + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseRouter")
            .field("table", &self.table)
            .field("queue_type", &type_name::<Q>())
            .field("claim_store_type", &type_name::<C>())
            .field("directory_type", &type_name::<D>())
            .field("config", &self.config)
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

impl<Q, C, D> CaseRouter<Q, C, D>
where
    Q: QueueStore + 'static,
    C: ClaimStore + 'static,
    D: Directory + 'static,
{
    pub fn new(
        table: RuleTable,
        queue: Arc<Q>,
        claims: ClaimEngine<C>,
        directory: Arc<D>,
        notifier: Arc<dyn Notifier>,
        config: RoutingConfig,
    ) -> Self {
        let outcomes = OutcomeBus::new(config.outcome_channel_capacity);
        Self {
            table,
            queue,
            claims,
            directory,
            notifier,
            config,
            outcomes,
        }
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn claims(&self) -> &ClaimEngine<C> {
        &self.claims
    }

    pub fn outcomes(&self) -> &OutcomeBus {
        &self.outcomes
    }

    /// Feed of every successfully routed event.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<RoutingOutcome> {
        self.outcomes.subscribe()
    }

    /// Subscribes this router for every kind in its table.
    pub fn register(self: &Arc<Self>, dispatcher: &mut DispatcherBuilder) {
        for kind in self.table.kinds() {
            dispatcher.subscribe(kind, Arc::clone(self) as Arc<dyn EventHandler>);
        }
    }

    /// Plans and applies one event.
    ///
    /// Follow-up events are returned in the outcome, not published; the
    /// [`EventHandler`] impl publishes them.
    pub async fn route(&self, event: &DomainEvent) -> anyhow::Result<RoutingOutcome> {
        let kind = event.kind();
        let result = telemetry::instrument_route(kind.as_str(), self.execute(event)).await;
        match &result {
            Ok(outcome) => {
                telemetry::record_route(kind.as_str(), "success");
                self.outcomes.publish(outcome.clone());
            }
            Err(err) => {
                tracing::warn!(event_kind = %kind, error = %err, "routing failed");
                telemetry::record_route(kind.as_str(), "failure");
            }
        }
        result
    }

    async fn execute(&self, event: &DomainEvent) -> anyhow::Result<RoutingOutcome> {
        let kind = event.kind();
        let rule = self.table.rule_for(kind)?;
        let ctx = RuleContext {
            directory: self.directory.as_ref(),
            config: &self.config,
        };
        let plan = rule.plan(event, &ctx).await?;

        let mut outcome = RoutingOutcome::new(kind);

        for update in plan.queue_updates {
            if update.transitions.is_empty() {
                continue;
            }
            let applied = self
                .queue
                .apply_transitions(update.provider_id, update.transitions)
                .await?;
            outcome.transitions.merge(&applied);
            outcome.providers_updated.push(update.provider_id);
        }

        for action in plan.claim_actions {
            let changed = match action {
                ClaimAction::MakeAvailable(case) => self.claims.make_available(case).await?,
                ClaimAction::Claim {
                    provider_id,
                    case_id,
                } => {
                    self.claims
                        .claim_if_unclaimed(provider_id, case_id, self.claims.default_lease())
                        .await?
                }
                ClaimAction::Extend {
                    provider_id,
                    case_id,
                } => {
                    self.claims
                        .extend_claim(provider_id, case_id, self.claims.default_lease())
                        .await?
                }
                ClaimAction::Finalize {
                    provider_id,
                    case_id,
                } => self.claims.finalize_assignment(provider_id, case_id).await?,
            };
            if changed {
                outcome.claims_applied += 1;
            }
        }

        for notification in plan.notifications {
            let sent = self
                .notifier
                .notify(
                    notification.role,
                    notification.provider_id,
                    notification.account_id,
                    notification.message,
                )
                .await;
            match sent {
                Ok(()) => outcome.notifications_sent += 1,
                Err(err) => {
                    telemetry::record_notification_failed("router", notification.provider_id, &err);
                    outcome.notifications_failed += 1;
                }
            }
        }

        outcome.follow_ups = plan.follow_ups;
        Ok(outcome)
    }
}

#[async_trait]
impl<Q, C, D> EventHandler for CaseRouter<Q, C, D>
where
    Q: QueueStore + 'static,
    C: ClaimStore + 'static,
    D: Directory + 'static,
{
    async fn handle(&self, event: &DomainEvent, dispatcher: &Dispatcher) -> anyhow::Result<()> {
        let outcome = self.route(event).await?;
        for follow_up in outcome.follow_ups {
            dispatcher.publish_async(follow_up);
        }
        Ok(())
    }
}
