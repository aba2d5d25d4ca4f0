use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::item::{AccountId, CaseId, PatientId, ProviderId, Role};

/// A doctor or care coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProviderId,
    pub account_id: AccountId,
    pub role: Role,
    /// e.g. "Dr. Kohen"
    pub short_display_name: String,
    /// e.g. "Dr. Joseph Kohen"
    pub long_display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: PatientId,
    pub first_name: String,
    pub last_name: String,
}

impl PatientProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseProfile {
    pub id: CaseId,
    pub patient_id: PatientId,
    /// Condition name, used as a queue item tag.
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareTeamMember {
    pub provider_id: ProviderId,
    pub role: Role,
    pub active: bool,
}

/// Providers attached to a case.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareTeam {
    pub members: Vec<CareTeamMember>,
}

impl CareTeam {
    fn active(&self, role: Role) -> Option<ProviderId> {
        self.members
            .iter()
            .find(|member| member.active && member.role == role)
            .map(|member| member.provider_id)
    }

    pub fn active_doctor(&self) -> Option<ProviderId> {
        self.active(Role::Doctor)
    }

    pub fn active_care_coordinator(&self) -> Option<ProviderId> {
        self.active(Role::CareCoordinator)
    }
}

/// Read-only lookups owned by external services.
///
/// Missing records are reported as [`RoutingError`](crate::error::RoutingError)
/// values wrapped in `anyhow::Error`.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn provider(&self, id: ProviderId) -> anyhow::Result<ProviderProfile>;

    async fn patient(&self, id: PatientId) -> anyhow::Result<PatientProfile>;

    async fn patient_case(&self, id: CaseId) -> anyhow::Result<CaseProfile>;

    /// Care team of a case; empty when nobody has been assigned.
    async fn care_team(&self, case_id: CaseId) -> anyhow::Result<CareTeam>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_care_team_ignores_inactive_members() {
        let team = CareTeam {
            members: vec![
                CareTeamMember {
                    provider_id: ProviderId(1),
                    role: Role::Doctor,
                    active: false,
                },
                CareTeamMember {
                    provider_id: ProviderId(2),
                    role: Role::Doctor,
                    active: true,
                },
                CareTeamMember {
                    provider_id: ProviderId(3),
                    role: Role::CareCoordinator,
                    active: false,
                },
            ],
        };
        assert_eq!(team.active_doctor(), Some(ProviderId(2)));
        assert_eq!(team.active_care_coordinator(), None);
    }
}
