use async_trait::async_trait;

use crate::action::ActionUrl;
use crate::error::RoutingError;
use crate::events::{DomainEvent, EventKind};
use crate::item::{EventType, ItemStatus, ProviderId, QueueItem};
use crate::notify::{NotificationMessage, OutboundNotification};
use crate::transition::QueueTransition;

use super::{remove, unexpected, RoutingPlan, RoutingRule, RuleContext};

/// Clears what a provider just handled on a case: the pending assignment
/// and the pending message.
fn clear_pending(provider_id: ProviderId, case_item: i64) -> [QueueTransition; 2] {
    [
        remove(
            provider_id,
            case_item,
            EventType::CaseAssignment,
            ItemStatus::Pending,
        ),
        remove(
            provider_id,
            case_item,
            EventType::CaseMessage,
            ItemStatus::Pending,
        ),
    ]
}

/// Routes posts on a case thread.
///
/// A provider's reply clears their pending work on the case and leaves a
/// history row; automated provider posts are ignored. A patient's message
/// goes to the care coordinator, or to the doctor when there is none.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePostedRule;

#[async_trait]
impl RoutingRule for MessagePostedRule {
    fn kind(&self) -> EventKind {
        EventKind::MessagePosted
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::MessagePosted(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let mut plan = RoutingPlan::new();
        if ev.sender_role.is_provider() && ev.automated {
            return Ok(plan);
        }

        let case = ctx.directory.patient_case(ev.case_id).await?;
        let patient = ctx.directory.patient(case.patient_id).await?;
        let messages = ActionUrl::ViewPatientMessages {
            patient_id: patient.id,
            case_id: ev.case_id,
        };

        if ev.sender_role.is_provider() {
            let sender_id = ProviderId(ev.sender_id);
            let sender = ctx.directory.provider(sender_id).await?;
            let replied = QueueItem::new(
                sender_id,
                ev.case_id.get(),
                EventType::CaseMessage,
                ItemStatus::Replied,
            )
            .with_patient(patient.id)
            .with_description(
                format!(
                    "{} replied to {}",
                    sender.short_display_name,
                    patient.full_name()
                ),
                format!("Messaged by {}", sender.short_display_name),
            )
            .with_action_url(messages)
            .with_tags([case.name]);

            let mut transitions = clear_pending(sender_id, ev.case_id.get()).to_vec();
            transitions.push(QueueTransition::insert(replied));
            plan.update(sender_id, transitions);
            return Ok(plan);
        }

        let team = ctx.directory.care_team(ev.case_id).await?;
        let recipient_id = team
            .active_care_coordinator()
            .or_else(|| team.active_doctor())
            .ok_or(RoutingError::NoCareTeamRecipient(ev.case_id))?;
        let recipient = ctx.directory.provider(recipient_id).await?;

        let item = QueueItem::new(
            recipient_id,
            ev.case_id.get(),
            EventType::CaseMessage,
            ItemStatus::Pending,
        )
        .with_patient(patient.id)
        .with_description(format!("Message from {}", patient.full_name()), "New message")
        .with_action_url(messages)
        .with_tags([case.name]);

        plan.update(recipient_id, vec![QueueTransition::insert_deduped(item)])
            .notify(OutboundNotification::to_provider(
                &recipient,
                NotificationMessage::NewMessage,
            ));
        Ok(plan)
    }
}

/// Hands a case from one provider to another.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseAssignedRule;

#[async_trait]
impl RoutingRule for CaseAssignedRule {
    fn kind(&self) -> EventKind {
        EventKind::CaseAssigned
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::CaseAssigned(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let sender = ctx.directory.provider(ev.assigned_by).await?;
        let recipient = ctx.directory.provider(ev.assigned_to).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;
        let patient = ctx.directory.patient(case.patient_id).await?;
        let messages = ActionUrl::ViewPatientMessages {
            patient_id: patient.id,
            case_id: ev.case_id,
        };

        let mut plan = RoutingPlan::new();
        if !ev.automated {
            let handled = QueueItem::new(
                sender.id,
                ev.case_id.get(),
                EventType::CaseAssignment,
                ItemStatus::Replied,
            )
            .with_patient(patient.id)
            .with_description(
                format!(
                    "{} assigned {}'s case to {}",
                    sender.short_display_name,
                    patient.full_name(),
                    recipient.short_display_name
                ),
                format!("Assigned to {}", recipient.short_display_name),
            )
            .with_action_url(messages)
            .with_tags([case.name.clone()]);

            let mut transitions = clear_pending(sender.id, ev.case_id.get()).to_vec();
            transitions.push(QueueTransition::insert(handled));
            plan.update(sender.id, transitions);
        }

        let assignment = QueueItem::new(
            recipient.id,
            ev.case_id.get(),
            EventType::CaseAssignment,
            ItemStatus::Pending,
        )
        .with_patient(patient.id)
        .with_description(
            format!(
                "{}'s case assigned to {}",
                patient.full_name(),
                recipient.short_display_name
            ),
            format!("Reassigned by {}", sender.short_display_name),
        )
        .with_action_url(messages)
        .with_tags([case.name]);

        plan.update(recipient.id, vec![QueueTransition::insert_deduped(assignment)])
            .notify(OutboundNotification::to_provider(
                &recipient,
                NotificationMessage::CaseAssigned,
            ));
        Ok(plan)
    }
}

/// Records a cancelled (or un-cancelled) scheduled message in the doctor's
/// history.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduledMessageCancelledRule;

#[async_trait]
impl RoutingRule for ScheduledMessageCancelledRule {
    fn kind(&self) -> EventKind {
        EventKind::ScheduledMessageCancelled
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::ScheduledMessageCancelled(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let doctor = ctx.directory.provider(ev.doctor_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;

        let (description, short_description) = if ev.undone {
            (
                format!(
                    "{} undid scheduled message cancellation for {}",
                    doctor.short_display_name,
                    patient.full_name()
                ),
                "Scheduled message cancellation undone",
            )
        } else {
            (
                format!(
                    "{} cancelled scheduled message for {}",
                    doctor.short_display_name,
                    patient.full_name()
                ),
                "Scheduled message cancelled",
            )
        };

        let item = QueueItem::new(
            ev.doctor_id,
            ev.case_id.get(),
            EventType::CaseMessage,
            ItemStatus::Cancelled,
        )
        .with_patient(ev.patient_id)
        .with_description(description, short_description)
        .with_action_url(ActionUrl::ViewPatientMessages {
            patient_id: ev.patient_id,
            case_id: ev.case_id,
        })
        .with_tags([case.name]);

        let mut plan = RoutingPlan::new();
        plan.update(ev.doctor_id, vec![QueueTransition::insert(item)]);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::events::{CaseAssigned, MessagePosted};
    use crate::item::Role;
    use crate::rules::test_support::{directory, CASE, DOCTOR, MA, PATIENT};

    fn from_patient() -> DomainEvent {
        DomainEvent::MessagePosted(MessagePosted {
            case_id: CASE,
            sender_role: Role::Patient,
            sender_id: PATIENT.get(),
            automated: false,
        })
    }

    #[tokio::test]
    async fn test_patient_message_prefers_care_coordinator() {
        let store = directory();
        store.assign_to_care_team(CASE, DOCTOR, Role::Doctor);
        store.assign_to_care_team(CASE, MA, Role::CareCoordinator);
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };

        let plan = MessagePostedRule.plan(&from_patient(), &ctx).await.unwrap();

        assert_eq!(plan.queue_updates.len(), 1);
        assert_eq!(plan.queue_updates[0].provider_id, MA);
        assert_eq!(plan.notifications[0].role, Role::CareCoordinator);
    }

    #[tokio::test]
    async fn test_patient_message_falls_back_to_doctor() {
        let store = directory();
        store.assign_to_care_team(CASE, DOCTOR, Role::Doctor);
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };

        let plan = MessagePostedRule.plan(&from_patient(), &ctx).await.unwrap();
        assert_eq!(plan.queue_updates[0].provider_id, DOCTOR);
    }

    #[tokio::test]
    async fn test_patient_message_without_care_team_fails() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };

        let err = MessagePostedRule
            .plan(&from_patient(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RoutingError>(),
            Some(&RoutingError::NoCareTeamRecipient(CASE))
        );
    }

    #[tokio::test]
    async fn test_automated_provider_message_is_ignored() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };
        let event = DomainEvent::MessagePosted(MessagePosted {
            case_id: CASE,
            sender_role: Role::Doctor,
            sender_id: DOCTOR.get(),
            automated: true,
        });

        let plan = MessagePostedRule.plan(&event, &ctx).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_automated_assignment_only_touches_recipient() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };
        let event = DomainEvent::CaseAssigned(CaseAssigned {
            case_id: CASE,
            assigned_by: MA,
            assigned_to: DOCTOR,
            automated: true,
        });

        let plan = CaseAssignedRule.plan(&event, &ctx).await.unwrap();

        assert_eq!(plan.queue_updates.len(), 1);
        assert_eq!(plan.queue_updates[0].provider_id, DOCTOR);
        assert_eq!(plan.notifications[0].provider_id, DOCTOR);
        assert_eq!(plan.notifications[0].role, Role::Doctor);
    }
}
