use thiserror::Error;

use crate::events::EventKind;
use crate::item::{CaseId, EventType, PatientId, ProviderId};

/// Errors raised while validating or applying queue transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// An item failed validation before insert.
    #[error("invalid queue item {item_id} ({event_type}): {reason}")]
    InvalidItem {
        item_id: i64,
        event_type: EventType,
        reason: &'static str,
    },

    /// A transition in the batch targets a different provider than the batch.
    #[error("transition for provider {found} in batch for provider {expected}")]
    ProviderMismatch {
        expected: ProviderId,
        found: ProviderId,
    },
}

/// Errors raised while turning a domain event into a routing plan.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("case {0} has no active care team member to receive the message")]
    NoCareTeamRecipient(CaseId),

    #[error("unknown provider {0}")]
    UnknownProvider(ProviderId),

    #[error("unknown patient {0}")]
    UnknownPatient(PatientId),

    #[error("unknown case {0}")]
    UnknownCase(CaseId),

    #[error("no routing rule registered for {0}")]
    NoRuleForEvent(EventKind),

    #[error("routing rule for {0} registered twice")]
    DuplicateRule(EventKind),

    /// A rule was handed an event of a kind it does not handle.
    #[error("rule for {expected} received {found} event")]
    UnexpectedEvent { expected: EventKind, found: EventKind },
}

/// Errors raised while loading or validating engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
