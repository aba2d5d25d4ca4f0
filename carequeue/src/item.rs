use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::ActionUrl;
use crate::error::QueueError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw identifier.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a doctor or care coordinator.
    ProviderId
);
numeric_id!(
    /// Identifier of a patient.
    PatientId
);
numeric_id!(
    /// Identifier of a patient case.
    CaseId
);
numeric_id!(
    /// Identifier of the login account behind a provider, used for notifications.
    AccountId
);

/// Two-letter care-providing region (a US state code).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Creates a region from its code, normalised to upper case.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role a participant plays on a case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Doctor,
    #[serde(rename = "MA")]
    CareCoordinator,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "DOCTOR",
            Role::CareCoordinator => "MA",
            Role::Patient => "PATIENT",
        }
    }

    /// Whether this role belongs to a care provider rather than a patient.
    pub fn is_provider(&self) -> bool {
        !matches!(self, Role::Patient)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $tag)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire tag used in storage and serialized payloads.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(anyhow::anyhow!(
                        "unknown {} `{}`",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

wire_enum!(
    /// Kind of clinical work a queue item represents.
    EventType {
        PatientVisit => "PATIENT_VISIT",
        TreatmentPlan => "TREATMENT_PLAN",
        RefillRequest => "REFILL_REQUEST",
        TransmissionError => "TRANSMISSION_ERROR",
        UnlinkedDntfTransmissionError => "UNLINKED_DNTF_TRANSMISSION_ERROR",
        RefillTransmissionError => "REFILL_TRANSMISSION_ERROR",
        CaseMessage => "CASE_MESSAGE",
        CaseAssignment => "CASE_ASSIGNMENT",
    }
);

wire_enum!(
    /// Lifecycle status of a queue item.
    ItemStatus {
        Pending => "PENDING",
        Ongoing => "ONGOING",
        Replied => "REPLIED",
        Read => "READ",
        Treated => "TREATED",
        Triaged => "TRIAGED",
        Cancelled => "CANCELLED",
        Approved => "APPROVED",
        Denied => "DENIED",
    }
);

impl ItemStatus {
    /// Open items show in the provider's inbox; everything else is history.
    pub fn is_open(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Ongoing)
    }
}

/// Identity of a queue row: (provider, item, event type) plus status.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub provider_id: ProviderId,
    pub item_id: i64,
    pub event_type: EventType,
    pub status: ItemStatus,
}

impl ItemKey {
    pub fn new(
        provider_id: ProviderId,
        item_id: i64,
        event_type: EventType,
        status: ItemStatus,
    ) -> Self {
        Self {
            provider_id,
            item_id,
            event_type,
            status,
        }
    }
}

/// A unit of work visible in exactly one provider's inbox or history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub provider_id: ProviderId,
    pub patient_id: Option<PatientId>,
    /// Visit, case, treatment plan, refill request or treatment id.
    pub item_id: i64,
    pub event_type: EventType,
    pub status: ItemStatus,
    pub description: String,
    pub short_description: String,
    pub action_url: Option<ActionUrl>,
    pub auth_url: Option<ActionUrl>,
    pub tags: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
    /// 1-based rank assigned at read time; never persisted.
    #[serde(skip)]
    pub position_in_queue: Option<usize>,
}

impl QueueItem {
    /// Creates an item enqueued now with empty descriptions.
    pub fn new(
        provider_id: ProviderId,
        item_id: i64,
        event_type: EventType,
        status: ItemStatus,
    ) -> Self {
        Self {
            provider_id,
            patient_id: None,
            item_id,
            event_type,
            status,
            description: String::new(),
            short_description: String::new(),
            action_url: None,
            auth_url: None,
            tags: Vec::new(),
            enqueued_at: Utc::now(),
            position_in_queue: None,
        }
    }

    pub fn with_patient(mut self, patient_id: PatientId) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    pub fn with_description(
        mut self,
        description: impl Into<String>,
        short_description: impl Into<String>,
    ) -> Self {
        self.description = description.into();
        self.short_description = short_description.into();
        self
    }

    pub fn with_action_url(mut self, action_url: ActionUrl) -> Self {
        self.action_url = Some(action_url);
        self
    }

    pub fn with_auth_url(mut self, auth_url: ActionUrl) -> Self {
        self.auth_url = Some(auth_url);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !tag.is_empty() && !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.provider_id, self.item_id, self.event_type, self.status)
    }

    /// Whether this row matches the given identity key.
    pub fn matches(&self, key: &ItemKey) -> bool {
        self.provider_id == key.provider_id
            && self.item_id == key.item_id
            && self.event_type == key.event_type
            && self.status == key.status
    }

    /// Checks the fields every stored item must carry.
    pub fn validate(&self) -> Result<(), QueueError> {
        let reason = if self.provider_id.get() == 0 {
            Some("provider id is required")
        } else if self.item_id == 0 {
            Some("item id is required")
        } else if self.description.trim().is_empty() {
            Some("description is required")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(QueueError::InvalidItem {
                item_id: self.item_id,
                event_type: self.event_type,
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> QueueItem {
        QueueItem::new(ProviderId(7), 42, EventType::PatientVisit, ItemStatus::Pending)
            .with_description("New visit", "New visit")
    }

    #[test]
    fn test_wire_tags_parse_back() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), *event_type);
        }
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), *status);
        }
        assert!("NOT_A_STATUS".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_open_statuses() {
        let open: Vec<_> = ItemStatus::ALL.iter().filter(|s| s.is_open()).collect();
        assert_eq!(open, vec![&ItemStatus::Pending, &ItemStatus::Ongoing]);
    }

    #[test]
    fn test_serde_uses_wire_tags() {
        let json = serde_json::to_string(&EventType::UnlinkedDntfTransmissionError).unwrap();
        assert_eq!(json, "\"UNLINKED_DNTF_TRANSMISSION_ERROR\"");
        let role = serde_json::to_string(&Role::CareCoordinator).unwrap();
        assert_eq!(role, "\"MA\"");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        assert!(item().validate().is_ok());

        let mut missing_provider = item();
        missing_provider.provider_id = ProviderId(0);
        assert!(matches!(
            missing_provider.validate(),
            Err(QueueError::InvalidItem { reason: "provider id is required", .. })
        ));

        let mut missing_item = item();
        missing_item.item_id = 0;
        assert!(missing_item.validate().is_err());

        let blank = item().with_description("  ", "");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_tags_are_an_ordered_set() {
        let item = item().with_tags(["Acne", "Rash", "Acne", ""]);
        assert_eq!(item.tags, vec!["Acne".to_string(), "Rash".to_string()]);
    }

    #[test]
    fn test_region_is_normalised() {
        assert_eq!(Region::new(" ca "), Region::new("CA"));
        assert_eq!(Region::from("ny").to_string(), "NY");
    }
}
