//! Deep-link action URLs attached to queue items.
//!
//! Actions render as `app:///action/<name>?<query>` with query keys in sorted
//! order, and parse back from that form.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::item::{CaseId, PatientId};

const PREFIX: &str = "app:///action/";

/// Which prescription a transmission error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransmissionTarget {
    Treatment(i64),
    UnlinkedDntfTreatment(i64),
}

/// Client action a queue item links to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ActionUrl {
    ViewPatientVisit {
        patient_id: PatientId,
        visit_id: i64,
        case_id: CaseId,
    },
    ViewTreatmentPlan {
        patient_id: PatientId,
        treatment_plan_id: i64,
        case_id: CaseId,
    },
    ViewRefillRequest {
        patient_id: PatientId,
        refill_request_id: i64,
    },
    ViewTransmissionError {
        patient_id: PatientId,
        target: TransmissionTarget,
    },
    ViewPatientMessages {
        patient_id: PatientId,
        case_id: CaseId,
    },
    ClaimPatientCase {
        patient_id: PatientId,
        case_id: CaseId,
    },
}

impl ActionUrl {
    pub fn name(&self) -> &'static str {
        match self {
            ActionUrl::ViewPatientVisit { .. } => "view_patient_visit",
            ActionUrl::ViewTreatmentPlan { .. } => "view_treatment_plan",
            ActionUrl::ViewRefillRequest { .. } => "view_refill_request",
            ActionUrl::ViewTransmissionError { .. } => "view_transmission_error",
            ActionUrl::ViewPatientMessages { .. } => "view_patient_messages",
            ActionUrl::ClaimPatientCase { .. } => "claim_patient_case",
        }
    }

    fn params(&self) -> BTreeMap<&'static str, i64> {
        let mut params = BTreeMap::new();
        match *self {
            ActionUrl::ViewPatientVisit {
                patient_id,
                visit_id,
                case_id,
            } => {
                params.insert("patient_id", patient_id.get());
                params.insert("patient_visit_id", visit_id);
                params.insert("case_id", case_id.get());
            }
            ActionUrl::ViewTreatmentPlan {
                patient_id,
                treatment_plan_id,
                case_id,
            } => {
                params.insert("patient_id", patient_id.get());
                params.insert("treatment_plan_id", treatment_plan_id);
                params.insert("case_id", case_id.get());
            }
            ActionUrl::ViewRefillRequest {
                patient_id,
                refill_request_id,
            } => {
                params.insert("patient_id", patient_id.get());
                params.insert("refill_request_id", refill_request_id);
            }
            ActionUrl::ViewTransmissionError { patient_id, target } => {
                params.insert("patient_id", patient_id.get());
                match target {
                    TransmissionTarget::Treatment(id) => {
                        params.insert("treatment_id", id);
                    }
                    TransmissionTarget::UnlinkedDntfTreatment(id) => {
                        params.insert("unlinked_dntf_treatment_id", id);
                    }
                }
            }
            ActionUrl::ViewPatientMessages {
                patient_id,
                case_id,
            }
            | ActionUrl::ClaimPatientCase {
                patient_id,
                case_id,
            } => {
                params.insert("patient_id", patient_id.get());
                params.insert("case_id", case_id.get());
            }
        }
        params
    }
}

impl Display for ActionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.name())?;
        for (i, (key, value)) in self.params().iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for ActionUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| anyhow::anyhow!("action url `{s}` is missing the app prefix"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut params = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed query pair `{pair}` in `{s}`"))?;
            let value: i64 = value
                .parse()
                .map_err(|e| anyhow::anyhow!("non-numeric `{key}` in `{s}`: {e}"))?;
            params.insert(key, value);
        }
        let get = |key: &str| {
            params
                .get(key)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("action url `{s}` is missing `{key}`"))
        };

        let action = match name {
            "view_patient_visit" => ActionUrl::ViewPatientVisit {
                patient_id: PatientId(get("patient_id")?),
                visit_id: get("patient_visit_id")?,
                case_id: CaseId(get("case_id")?),
            },
            "view_treatment_plan" => ActionUrl::ViewTreatmentPlan {
                patient_id: PatientId(get("patient_id")?),
                treatment_plan_id: get("treatment_plan_id")?,
                case_id: CaseId(get("case_id")?),
            },
            "view_refill_request" => ActionUrl::ViewRefillRequest {
                patient_id: PatientId(get("patient_id")?),
                refill_request_id: get("refill_request_id")?,
            },
            "view_transmission_error" => {
                let target = match params.get("treatment_id") {
                    Some(id) => TransmissionTarget::Treatment(*id),
                    None => TransmissionTarget::UnlinkedDntfTreatment(get(
                        "unlinked_dntf_treatment_id",
                    )?),
                };
                ActionUrl::ViewTransmissionError {
                    patient_id: PatientId(get("patient_id")?),
                    target,
                }
            }
            "view_patient_messages" => ActionUrl::ViewPatientMessages {
                patient_id: PatientId(get("patient_id")?),
                case_id: CaseId(get("case_id")?),
            },
            "claim_patient_case" => ActionUrl::ClaimPatientCase {
                patient_id: PatientId(get("patient_id")?),
                case_id: CaseId(get("case_id")?),
            },
            other => anyhow::bail!("unknown action `{other}`"),
        };
        Ok(action)
    }
}

impl Serialize for ActionUrl {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
