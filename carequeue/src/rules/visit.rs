use async_trait::async_trait;
use chrono::Utc;

use crate::action::ActionUrl;
use crate::claim::UnclaimedCase;
use crate::events::{DomainEvent, EventKind, MessagePosted};
use crate::item::{EventType, ItemStatus, QueueItem, Role};
use crate::notify::{NotificationMessage, OutboundNotification};
use crate::transition::QueueTransition;

use super::{remove, unexpected, ClaimAction, RoutingPlan, RoutingRule, RuleContext};

/// A paid visit goes to the case's doctor, or into the jump-ball pool of
/// its region when the case has none.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisitChargedRule;

#[async_trait]
impl RoutingRule for VisitChargedRule {
    fn kind(&self) -> EventKind {
        EventKind::VisitCharged
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::VisitCharged(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let patient = ctx.directory.patient(ev.patient_id).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;
        let team = ctx.directory.care_team(ev.case_id).await?;
        let description = format!("New visit with {}", patient.full_name());

        let mut plan = RoutingPlan::new();
        match team.active_doctor() {
            Some(doctor_id) => {
                let doctor = ctx.directory.provider(doctor_id).await?;
                let item = QueueItem::new(
                    doctor_id,
                    ev.visit_id,
                    EventType::PatientVisit,
                    ItemStatus::Pending,
                )
                .with_patient(ev.patient_id)
                .with_description(description, "New visit")
                .with_action_url(ActionUrl::ViewPatientVisit {
                    patient_id: ev.patient_id,
                    visit_id: ev.visit_id,
                    case_id: ev.case_id,
                })
                .with_tags([case.name]);

                plan.update(doctor_id, vec![QueueTransition::insert_deduped(item)])
                    .notify(OutboundNotification::to_provider(
                        &doctor,
                        NotificationMessage::VisitRouted,
                    ));
            }
            None => {
                plan.claim(ClaimAction::MakeAvailable(UnclaimedCase {
                    case_id: ev.case_id,
                    patient_id: ev.patient_id,
                    visit_id: ev.visit_id,
                    region: ev.region.clone(),
                    description,
                    short_description: "New visit".to_string(),
                    tags: vec![case.name],
                    enqueued_at: Utc::now(),
                }));
            }
        }
        Ok(plan)
    }
}

/// Submitting a treatment plan completes the visit, makes the doctor's
/// claim permanent and tells the care coordinator.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreatmentPlanSubmittedRule;

#[async_trait]
impl RoutingRule for TreatmentPlanSubmittedRule {
    fn kind(&self) -> EventKind {
        EventKind::TreatmentPlanSubmitted
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::TreatmentPlanSubmitted(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let doctor = ctx.directory.provider(ev.doctor_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;
        let team = ctx.directory.care_team(ev.case_id).await?;

        let history = QueueItem::new(
            ev.doctor_id,
            ev.treatment_plan_id,
            EventType::TreatmentPlan,
            ItemStatus::Treated,
        )
        .with_patient(ev.patient_id)
        .with_description(
            format!(
                "{} completed treatment plan for {}",
                doctor.short_display_name,
                patient.full_name()
            ),
            format!("Treatment plan by {}", doctor.short_display_name),
        )
        .with_action_url(ActionUrl::ViewTreatmentPlan {
            patient_id: ev.patient_id,
            treatment_plan_id: ev.treatment_plan_id,
            case_id: ev.case_id,
        })
        .with_tags([case.name]);

        let mut plan = RoutingPlan::new();
        plan.update(
            ev.doctor_id,
            vec![
                remove(
                    ev.doctor_id,
                    ev.case_id.get(),
                    EventType::CaseAssignment,
                    ItemStatus::Pending,
                ),
                remove(
                    ev.doctor_id,
                    ev.visit_id,
                    EventType::PatientVisit,
                    ItemStatus::Pending,
                ),
                remove(
                    ev.doctor_id,
                    ev.visit_id,
                    EventType::PatientVisit,
                    ItemStatus::Ongoing,
                ),
                QueueTransition::insert(history),
            ],
        )
        .claim(ClaimAction::Finalize {
            provider_id: ev.doctor_id,
            case_id: ev.case_id,
        });

        if let Some(ma_id) = team.active_care_coordinator() {
            let ma = ctx.directory.provider(ma_id).await?;
            plan.notify(OutboundNotification::to_provider(
                &ma,
                NotificationMessage::TreatmentPlanCreated,
            ));
        }
        Ok(plan)
    }
}

/// A visit the doctor cannot treat online is triaged, the claim finalized and
/// the case handed to the care coordinator when there is one.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisitMarkedUnsuitableRule;

#[async_trait]
impl RoutingRule for VisitMarkedUnsuitableRule {
    fn kind(&self) -> EventKind {
        EventKind::VisitMarkedUnsuitable
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::VisitMarkedUnsuitable(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let team = ctx.directory.care_team(ev.case_id).await?;
        let doctor = ctx.directory.provider(ev.doctor_id).await?;
        let patient = ctx.directory.patient(ev.patient_id).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;

        let triaged = QueueItem::new(
            ev.doctor_id,
            ev.visit_id,
            EventType::PatientVisit,
            ItemStatus::Triaged,
        )
        .with_patient(ev.patient_id)
        .with_description(
            format!(
                "{} completed and triaged visit for {}",
                doctor.short_display_name,
                patient.full_name()
            ),
            format!("Visit triaged by {}", doctor.short_display_name),
        )
        .with_action_url(ActionUrl::ViewPatientVisit {
            patient_id: ev.patient_id,
            visit_id: ev.visit_id,
            case_id: ev.case_id,
        })
        .with_tags([case.name.clone()]);

        let mut plan = RoutingPlan::new();
        plan.update(
            ev.doctor_id,
            vec![QueueTransition::replace(triaged, ItemStatus::Ongoing)],
        )
        .claim(ClaimAction::Finalize {
            provider_id: ev.doctor_id,
            case_id: ev.case_id,
        });

        if let Some(ma_id) = team.active_care_coordinator() {
            let ma = ctx.directory.provider(ma_id).await?;
            let assignment = QueueItem::new(
                ma_id,
                ev.case_id.get(),
                EventType::CaseAssignment,
                ItemStatus::Pending,
            )
            .with_patient(ev.patient_id)
            .with_description(
                format!(
                    "{}'s case assigned to {}",
                    patient.full_name(),
                    ma.short_display_name
                ),
                format!("Reassigned by {}", doctor.short_display_name),
            )
            .with_action_url(ActionUrl::ViewPatientMessages {
                patient_id: ev.patient_id,
                case_id: ev.case_id,
            })
            .with_tags([case.name.clone()]);

            plan.update(ma_id, vec![QueueTransition::insert_deduped(assignment)])
                .notify(OutboundNotification::to_provider(
                    &ma,
                    NotificationMessage::CaseAssigned,
                ));
        }

        if ctx.config.public_unsuitable_message {
            plan.follow_up(DomainEvent::MessagePosted(MessagePosted {
                case_id: ev.case_id,
                sender_role: Role::Doctor,
                sender_id: ev.doctor_id.get(),
                automated: false,
            }));
        }
        Ok(plan)
    }
}
