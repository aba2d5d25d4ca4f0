use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::directory::ProviderProfile;
use crate::item::{AccountId, ProviderId, Role};

/// Message types sent to providers; only the short text leaves the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMessage {
    VisitRouted,
    UnclaimedCase,
    CaseAssigned,
    NewMessage,
    TreatmentPlanCreated,
    RxTransmissionError,
    RefillRequestCreated,
}

impl NotificationMessage {
    pub fn short_message(&self) -> &'static str {
        match self {
            NotificationMessage::VisitRouted => "You have a new patient visit waiting.",
            NotificationMessage::UnclaimedCase => {
                "A new patient visit is waiting to be claimed."
            }
            NotificationMessage::CaseAssigned => "A case has been assigned to you.",
            NotificationMessage::NewMessage => "You have a new message from a patient.",
            NotificationMessage::TreatmentPlanCreated => {
                "A doctor has completed a treatment plan for one of your cases."
            }
            NotificationMessage::RxTransmissionError => {
                "There was an error routing a prescription to the pharmacy."
            }
            NotificationMessage::RefillRequestCreated => "You have a new refill request.",
        }
    }
}

/// A notification a routing plan wants delivered.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub role: Role,
    pub provider_id: ProviderId,
    pub account_id: AccountId,
    pub message: NotificationMessage,
}

impl OutboundNotification {
    /// Addresses a message to a provider in their directory role.
    pub fn to_provider(profile: &ProviderProfile, message: NotificationMessage) -> Self {
        Self {
            role: profile.role,
            provider_id: profile.id,
            account_id: profile.account_id,
            message,
        }
    }
}

/// Boundary to the push/SMS/email delivery service.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        role: Role,
        provider_id: ProviderId,
        account_id: AccountId,
        message: NotificationMessage,
    ) -> anyhow::Result<()>;
}

/// Notifier that only logs, for deployments without a delivery service.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        role: Role,
        provider_id: ProviderId,
        account_id: AccountId,
        message: NotificationMessage,
    ) -> anyhow::Result<()> {
        tracing::info!(
            role = %role,
            provider_id = %provider_id,
            account_id = %account_id,
            message = message.short_message(),
            "notification sent"
        );
        Ok(())
    }
}
