use async_trait::async_trait;

use crate::action::ActionUrl;
use crate::events::{DomainEvent, EventKind};
use crate::item::{EventType, ItemStatus, QueueItem};
use crate::transition::QueueTransition;

use super::{unexpected, ClaimAction, RoutingPlan, RoutingRule, RuleContext};

/// Opening a visit moves the doctor's pending item to ongoing and, for a
/// case still in the pool, takes a temporary claim on it.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisitOpenedRule;

#[async_trait]
impl RoutingRule for VisitOpenedRule {
    fn kind(&self) -> EventKind {
        EventKind::VisitOpened
    }

    async fn plan(&self, event: &DomainEvent, ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let DomainEvent::VisitOpened(ev) = event else {
            return Err(unexpected(self.kind(), event));
        };

        let patient = ctx.directory.patient(ev.patient_id).await?;
        let case = ctx.directory.patient_case(ev.case_id).await?;

        let ongoing = QueueItem::new(
            ev.provider_id,
            ev.visit_id,
            EventType::PatientVisit,
            ItemStatus::Ongoing,
        )
        .with_patient(ev.patient_id)
        .with_description(format!("Reviewing visit with {}", patient.full_name()), "Visit in review")
        .with_action_url(ActionUrl::ViewPatientVisit {
            patient_id: ev.patient_id,
            visit_id: ev.visit_id,
            case_id: ev.case_id,
        })
        .with_tags([case.name]);

        let mut plan = RoutingPlan::new();
        plan.update(
            ev.provider_id,
            vec![QueueTransition::replace(ongoing, ItemStatus::Pending)],
        )
        .claim(ClaimAction::Claim {
            provider_id: ev.provider_id,
            case_id: ev.case_id,
        });
        Ok(plan)
    }
}

/// Work on a claimed visit keeps the claim alive.
///
/// Registered once per kind that counts as activity on the visit.
#[derive(Clone, Copy, Debug)]
pub struct ClaimExtensionRule {
    kind: EventKind,
}

impl ClaimExtensionRule {
    pub fn new(kind: EventKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl RoutingRule for ClaimExtensionRule {
    fn kind(&self) -> EventKind {
        self.kind
    }

    async fn plan(&self, event: &DomainEvent, _ctx: &RuleContext<'_>) -> anyhow::Result<RoutingPlan> {
        let (provider_id, case_id) = match event {
            DomainEvent::DiagnosisModified(ev) if self.kind == EventKind::DiagnosisModified => {
                (ev.provider_id, ev.case_id)
            }
            DomainEvent::TreatmentPlanModified(ev)
                if self.kind == EventKind::TreatmentPlanModified =>
            {
                (ev.provider_id, ev.case_id)
            }
            _ => return Err(unexpected(self.kind, event)),
        };

        let mut plan = RoutingPlan::new();
        plan.claim(ClaimAction::Extend {
            provider_id,
            case_id,
        });
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingConfig;
    use crate::events::{DiagnosisModified, TreatmentPlanChange, TreatmentPlanModified, VisitOpened};
    use crate::rules::test_support::{directory, CASE, DOCTOR, PATIENT};

    #[tokio::test]
    async fn test_opened_visit_claims_and_marks_ongoing() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };
        let event = DomainEvent::VisitOpened(VisitOpened {
            provider_id: DOCTOR,
            patient_id: PATIENT,
            case_id: CASE,
            visit_id: 7,
        });

        let plan = VisitOpenedRule.plan(&event, &ctx).await.unwrap();

        assert_eq!(
            plan.claim_actions,
            vec![ClaimAction::Claim {
                provider_id: DOCTOR,
                case_id: CASE
            }]
        );
        let QueueTransition::Replace {
            item,
            required_current_status,
        } = &plan.queue_updates[0].transitions[0]
        else {
            panic!("expected replace");
        };
        assert_eq!(*required_current_status, ItemStatus::Pending);
        assert_eq!(item.status, ItemStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_extension_rule_handles_its_own_kind_only() {
        let store = directory();
        let config = RoutingConfig::default();
        let ctx = RuleContext {
            directory: &store,
            config: &config,
        };
        let modified = DomainEvent::TreatmentPlanModified(TreatmentPlanModified {
            provider_id: DOCTOR,
            case_id: CASE,
            treatment_plan_id: 8,
            change: TreatmentPlanChange::Regimen,
        });

        let plan = ClaimExtensionRule::new(EventKind::TreatmentPlanModified)
            .plan(&modified, &ctx)
            .await
            .unwrap();
        assert_eq!(
            plan.claim_actions,
            vec![ClaimAction::Extend {
                provider_id: DOCTOR,
                case_id: CASE
            }]
        );
        assert!(plan.queue_updates.is_empty());

        let diagnosis = DomainEvent::DiagnosisModified(DiagnosisModified {
            provider_id: DOCTOR,
            case_id: CASE,
            visit_id: 7,
        });
        assert!(ClaimExtensionRule::new(EventKind::TreatmentPlanModified)
            .plan(&diagnosis, &ctx)
            .await
            .is_err());
    }
}
