use async_trait::async_trait;

use crate::action::{ActionUrl, TransmissionTarget};
use crate::events::{DomainEvent, EventKind, PrescriptionKind, RefillDecision};
use crate::item::{EventType, ItemStatus, PatientId, QueueItem};
use crate::notify::{NotificationMessage, OutboundNotification};
use crate::transition::QueueTransition;

use super::{unexpected, RoutingPlan, RoutingRule, RuleContext};

fn error_event_type(kind: PrescriptionKind) -> EventType {
    match kind {
        PrescriptionKind::Treatment => EventType::TransmissionError,
        PrescriptionKind::Refill => EventType::RefillTransmissionError,
        PrescriptionKind::UnlinkedDntf => EventType::UnlinkedDntfTransmissionError,
    }
}

fn error_action(kind: PrescriptionKind, patient_id: PatientId, item_id: i64) -> ActionUrl {
    match kind {
        PrescriptionKind::Treatment => ActionUrl::ViewTransmissionError {
            patient_id,
            target: TransmissionTarget::Treatment(item_id),
        },
        PrescriptionKind::Refill => ActionUrl::ViewRefillRequest {
            patient_id,
            refill_request_id: item_id,
        },
        PrescriptionKind::UnlinkedDntf => ActionUrl::ViewTransmissionError {
            patient_id,
            target: TransmissionTarget::UnlinkedDntfTreatment(item_id),
        },
    }
}

/// A rejected prescription lands in the prescriber's queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct RxTransmissionErrorRule;

#[async_trait]
impl RoutingRule for RxTransmissionErrorRule {
    fn kind(&self) -> EventKind {
        EventKind::RxTransmissionError
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::RxTransmissionError(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let provider = ctx.directory.provider(ev.provider_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;

        let item = QueueItem::new(
            ev.provider_id,
            ev.item_id,
            error_event_type(ev.kind),
            ItemStatus::Pending,
        )
        .with_patient(ev.patient_id)
        .with_description(
            format!("Error sending prescription for {}", patient.full_name()),
            "Prescription error",
        )
        .with_action_url(error_action(ev.kind, ev.patient_id, ev.item_id));

        // The event names the role the prescriber acted in.
        let mut notification =
            OutboundNotification::to_provider(&provider, NotificationMessage::RxTransmissionError);
        notification.role = ev.provider_role;

        let mut plan = RoutingPlan::new();
        plan.update(ev.provider_id, vec![QueueTransition::insert_deduped(item)])
            .notify(notification);
        Ok(plan)
    }
}

/// Resolving a transmission error moves its item to history.
#[derive(Clone, Copy, Debug, Default)]
pub struct RxTransmissionErrorResolvedRule;

#[async_trait]
impl RoutingRule for RxTransmissionErrorResolvedRule {
    fn kind(&self) -> EventKind {
        EventKind::RxTransmissionErrorResolved
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::RxTransmissionErrorResolved(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let provider = ctx.directory.provider(ev.provider_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;
        let name = &provider.short_display_name;

        let (description, short_description) = match ev.kind {
            PrescriptionKind::Refill => (
                format!(
                    "{name} resolved refill request error for {}",
                    patient.full_name()
                ),
                format!("Refill request error resolved by {name}"),
            ),
            PrescriptionKind::Treatment | PrescriptionKind::UnlinkedDntf => (
                format!("{name} resolved error for {}", patient.full_name()),
                format!("Prescription error resolved by {name}"),
            ),
        };

        let item = QueueItem::new(
            ev.provider_id,
            ev.item_id,
            error_event_type(ev.kind),
            ItemStatus::Treated,
        )
        .with_patient(ev.patient_id)
        .with_description(description, short_description)
        .with_action_url(error_action(ev.kind, ev.patient_id, ev.item_id));

        let mut plan = RoutingPlan::new();
        plan.update(
            ev.provider_id,
            vec![QueueTransition::replace(item, ItemStatus::Pending)],
        );
        Ok(plan)
    }
}

/// A pharmacy refill request goes to the patient's doctor.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefillRequestCreatedRule;

#[async_trait]
impl RoutingRule for RefillRequestCreatedRule {
    fn kind(&self) -> EventKind {
        EventKind::RefillRequestCreated
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::RefillRequestCreated(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let doctor = ctx.directory.provider(ev.doctor_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;

        let item = QueueItem::new(
            ev.doctor_id,
            ev.refill_request_id,
            EventType::RefillRequest,
            ItemStatus::Pending,
        )
        .with_patient(ev.patient_id)
        .with_description(
            format!("Refill request for {}", patient.full_name()),
            "Refill request",
        )
        .with_action_url(ActionUrl::ViewRefillRequest {
            patient_id: ev.patient_id,
            refill_request_id: ev.refill_request_id,
        });

        let mut plan = RoutingPlan::new();
        plan.update(ev.doctor_id, vec![QueueTransition::insert_deduped(item)])
            .notify(OutboundNotification::to_provider(
                &doctor,
                NotificationMessage::RefillRequestCreated,
            ));
        Ok(plan)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RefillRequestResolvedRule;

#[async_trait]
impl RoutingRule for RefillRequestResolvedRule {
    fn kind(&self) -> EventKind {
        EventKind::RefillRequestResolved
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::RefillRequestResolved(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let doctor = ctx.directory.provider(ev.doctor_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;
        let name = &doctor.short_display_name;

        let (status, verb, label) = match ev.decision {
            RefillDecision::Approved => (ItemStatus::Approved, "approved", "Refill request approved"),
            RefillDecision::Denied => (ItemStatus::Denied, "denied", "Refill request denied"),
        };

        let item = QueueItem::new(
            ev.doctor_id,
            ev.refill_request_id,
            EventType::RefillRequest,
            status,
        )
        .with_patient(ev.patient_id)
        .with_description(
            format!("{name} {verb} refill request for {}", patient.full_name()),
            format!("{label} by {name}"),
        )
        .with_action_url(ActionUrl::ViewRefillRequest {
            patient_id: ev.patient_id,
            refill_request_id: ev.refill_request_id,
        });

        let mut plan = RoutingPlan::new();
        plan.update(
            ev.doctor_id,
            vec![QueueTransition::replace(item, ItemStatus::Pending)],
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::events::{RefillRequestResolved, RxTransmissionError};
    use crate::item::Role;
    use crate::rules::test_support::{directory, DOCTOR, MA, PATIENT};

    #[tokio::test]
    async fn test_error_item_type_follows_prescription_kind() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };

        for (kind, expected) in [
            (PrescriptionKind::Treatment, EventType::TransmissionError),
            (PrescriptionKind::Refill, EventType::RefillTransmissionError),
            (
                PrescriptionKind::UnlinkedDntf,
                EventType::UnlinkedDntfTransmissionError,
            ),
        ] {
            let event = DomainEvent::RxTransmissionError(RxTransmissionError {
                provider_id: MA,
                provider_role: Role::CareCoordinator,
                patient_id: PATIENT,
                item_id: 55,
                kind,
            });
            let plan = RxTransmissionErrorRule.plan(&event, &ctx).await.unwrap();
            let QueueTransition::Insert { item, .. } = &plan.queue_updates[0].transitions[0] else {
                panic!("expected insert");
            };
            assert_eq!(item.event_type, expected);
            assert_eq!(item.provider_id, MA);
            assert_eq!(plan.notifications[0].role, Role::CareCoordinator);
        }
    }

    #[tokio::test]
    async fn test_denied_refill_replaces_pending_item() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };
        let event = DomainEvent::RefillRequestResolved(RefillRequestResolved {
            doctor_id: DOCTOR,
            patient_id: PATIENT,
            refill_request_id: 66,
            decision: RefillDecision::Denied,
        });

        let plan = RefillRequestResolvedRule.plan(&event, &ctx).await.unwrap();

        let QueueTransition::Replace {
            item,
            required_current_status,
        } = &plan.queue_updates[0].transitions[0]
        else {
            panic!("expected replace");
        };
        assert_eq!(*required_current_status, ItemStatus::Pending);
        assert_eq!(item.status, ItemStatus::Denied);
        assert_eq!(item.short_description, "Refill request denied by Dr. Kohen");
        assert!(plan.notifications.is_empty());
    }
}
