use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::item::{CaseId, PatientId, ProviderId, Role};
use crate::transition::TransitionOutcome;

/// Fieldless tag of a [`DomainEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    VisitCharged,
    VisitOpened,
    DiagnosisModified,
    TreatmentPlanModified,
    TreatmentPlanSubmitted,
    VisitMarkedUnsuitable,
    RxTransmissionError,
    RxTransmissionErrorResolved,
    RefillRequestCreated,
    RefillRequestResolved,
    MessagePosted,
    CaseAssigned,
    ScheduledMessageCancelled,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::VisitCharged,
        EventKind::VisitOpened,
        EventKind::DiagnosisModified,
        EventKind::TreatmentPlanModified,
        EventKind::TreatmentPlanSubmitted,
        EventKind::VisitMarkedUnsuitable,
        EventKind::RxTransmissionError,
        EventKind::RxTransmissionErrorResolved,
        EventKind::RefillRequestCreated,
        EventKind::RefillRequestResolved,
        EventKind::MessagePosted,
        EventKind::CaseAssigned,
        EventKind::ScheduledMessageCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::VisitCharged => "VISIT_CHARGED",
            EventKind::VisitOpened => "VISIT_OPENED",
            EventKind::DiagnosisModified => "DIAGNOSIS_MODIFIED",
            EventKind::TreatmentPlanModified => "TREATMENT_PLAN_MODIFIED",
            EventKind::TreatmentPlanSubmitted => "TREATMENT_PLAN_SUBMITTED",
            EventKind::VisitMarkedUnsuitable => "VISIT_MARKED_UNSUITABLE",
            EventKind::RxTransmissionError => "RX_TRANSMISSION_ERROR",
            EventKind::RxTransmissionErrorResolved => "RX_TRANSMISSION_ERROR_RESOLVED",
            EventKind::RefillRequestCreated => "REFILL_REQUEST_CREATED",
            EventKind::RefillRequestResolved => "REFILL_REQUEST_RESOLVED",
            EventKind::MessagePosted => "MESSAGE_POSTED",
            EventKind::CaseAssigned => "CASE_ASSIGNED",
            EventKind::ScheduledMessageCancelled => "SCHEDULED_MESSAGE_CANCELLED",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A visit was paid for and needs a doctor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitCharged {
    pub patient_id: PatientId,
    pub case_id: CaseId,
    pub visit_id: i64,
    /// Region the patient is being treated in.
    pub region: crate::item::Region,
}

/// A doctor opened a visit, taking a temporary claim on an unassigned case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitOpened {
    pub provider_id: ProviderId,
    pub patient_id: PatientId,
    pub case_id: CaseId,
    pub visit_id: i64,
}

/// A doctor changed the diagnosis of a visit under review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisModified {
    pub provider_id: ProviderId,
    pub case_id: CaseId,
    pub visit_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentPlanChange {
    Treatments,
    Regimen,
    Advice,
}

/// A doctor edited a draft treatment plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPlanModified {
    pub provider_id: ProviderId,
    pub case_id: CaseId,
    pub treatment_plan_id: i64,
    pub change: TreatmentPlanChange,
}

/// A doctor submitted (activated) a treatment plan, completing the visit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPlanSubmitted {
    pub doctor_id: ProviderId,
    pub patient_id: PatientId,
    pub case_id: CaseId,
    pub visit_id: i64,
    pub treatment_plan_id: i64,
}

/// A doctor decided the visit cannot be treated online.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitMarkedUnsuitable {
    pub doctor_id: ProviderId,
    pub patient_id: PatientId,
    pub case_id: CaseId,
    pub visit_id: i64,
    pub reason: String,
}

/// Which prescription flow a transmission error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionKind {
    /// A treatment prescribed in a treatment plan.
    Treatment,
    /// A prescription written in answer to a refill request.
    Refill,
    /// A do-not-fill-and-rewrite treatment not linked to any plan.
    UnlinkedDntf,
}

/// The e-prescribing network rejected a prescription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxTransmissionError {
    pub provider_id: ProviderId,
    pub provider_role: Role,
    pub patient_id: PatientId,
    /// Treatment, refill request or unlinked treatment id.
    pub item_id: i64,
    pub kind: PrescriptionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxTransmissionErrorResolved {
    pub provider_id: ProviderId,
    pub patient_id: PatientId,
    pub item_id: i64,
    pub kind: PrescriptionKind,
}

/// A pharmacy asked the patient's doctor for a refill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillRequestCreated {
    pub doctor_id: ProviderId,
    pub patient_id: PatientId,
    pub refill_request_id: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillDecision {
    Approved,
    Denied,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefillRequestResolved {
    pub doctor_id: ProviderId,
    pub patient_id: PatientId,
    pub refill_request_id: i64,
    pub decision: RefillDecision,
}

/// Someone posted to a case's message thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePosted {
    pub case_id: CaseId,
    pub sender_role: Role,
    /// Provider id, or patient id when a patient is the sender.
    pub sender_id: i64,
    /// Messages generated by the system rather than typed by a provider.
    pub automated: bool,
}

/// A case was handed from one provider to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseAssigned {
    pub case_id: CaseId,
    pub assigned_by: ProviderId,
    pub assigned_to: ProviderId,
    pub automated: bool,
}

/// A message scheduled for a patient was cancelled before it went out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessageCancelled {
    pub doctor_id: ProviderId,
    pub patient_id: PatientId,
    pub case_id: CaseId,
    /// The message was withdrawn rather than deleted.
    pub undone: bool,
}

/// Domain events the rule engine routes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    VisitCharged(VisitCharged),
    VisitOpened(VisitOpened),
    DiagnosisModified(DiagnosisModified),
    TreatmentPlanModified(TreatmentPlanModified),
    TreatmentPlanSubmitted(TreatmentPlanSubmitted),
    VisitMarkedUnsuitable(VisitMarkedUnsuitable),
    RxTransmissionError(RxTransmissionError),
    RxTransmissionErrorResolved(RxTransmissionErrorResolved),
    RefillRequestCreated(RefillRequestCreated),
    RefillRequestResolved(RefillRequestResolved),
    MessagePosted(MessagePosted),
    CaseAssigned(CaseAssigned),
    ScheduledMessageCancelled(ScheduledMessageCancelled),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::VisitCharged(_) => EventKind::VisitCharged,
            DomainEvent::VisitOpened(_) => EventKind::VisitOpened,
            DomainEvent::DiagnosisModified(_) => EventKind::DiagnosisModified,
            DomainEvent::TreatmentPlanModified(_) => EventKind::TreatmentPlanModified,
            DomainEvent::TreatmentPlanSubmitted(_) => EventKind::TreatmentPlanSubmitted,
            DomainEvent::VisitMarkedUnsuitable(_) => EventKind::VisitMarkedUnsuitable,
            DomainEvent::RxTransmissionError(_) => EventKind::RxTransmissionError,
            DomainEvent::RxTransmissionErrorResolved(_) => EventKind::RxTransmissionErrorResolved,
            DomainEvent::RefillRequestCreated(_) => EventKind::RefillRequestCreated,
            DomainEvent::RefillRequestResolved(_) => EventKind::RefillRequestResolved,
            DomainEvent::MessagePosted(_) => EventKind::MessagePosted,
            DomainEvent::CaseAssigned(_) => EventKind::CaseAssigned,
            DomainEvent::ScheduledMessageCancelled(_) => EventKind::ScheduledMessageCancelled,
        }
    }
}

/// Summary of one routed event, broadcast to observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub id: Uuid,
    pub kind: EventKind,
    pub routed_at: DateTime<Utc>,
    /// Providers whose queues received a batch, in application order.
    pub providers_updated: Vec<ProviderId>,
    pub transitions: TransitionOutcome,
    /// Claim actions that changed the claim row.
    pub claims_applied: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// Events the plan asked to publish next.
    pub follow_ups: Vec<DomainEvent>,
}

impl RoutingOutcome {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            routed_at: Utc::now(),
            providers_updated: Vec::new(),
            transitions: TransitionOutcome::default(),
            claims_applied: 0,
            notifications_sent: 0,
            notifications_failed: 0,
            follow_ups: Vec::new(),
        }
    }
}

/// In-process fan-out of [`RoutingOutcome`]s using a tokio broadcast channel.
///
/// Publishing never blocks; subscribers that fall behind receive
/// `RecvError::Lagged`.
#[derive(Clone)]
pub struct OutcomeBus {
    sender: broadcast::Sender<RoutingOutcome>,
    capacity: usize,
}

impl fmt::Debug for OutcomeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl OutcomeBus {
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of outcomes to buffer. When the
    ///   buffer is full, old outcomes are dropped for lagging subscribers.
    ///   Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an outcome. Dropped silently when nobody listens.
    pub fn publish(&self, outcome: RoutingOutcome) {
        let _ = self.sender.send(outcome);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingOutcome> {
        self.sender.subscribe()
    }
}

/// Receives domain events of the kinds it was subscribed for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. `dispatcher` lets the handler publish follow-ups.
    async fn handle(&self, event: &DomainEvent, dispatcher: &Dispatcher) -> anyhow::Result<()>;
}

/// Collects subscriptions before the [`Dispatcher`] is frozen.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("kinds", &self.handlers.len())
            .finish()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Handlers run in
    /// registration order.
    pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Delivers domain events to their handlers.
///
/// The subscription table is fixed once built; clones share it.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(EventKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("Dispatcher").field("kinds", &kinds).finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Runs every handler for the event's kind, in order, in the caller's
    /// task. All handlers run; the first error is returned.
    pub async fn publish(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let kind = event.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            tracing::debug!(event_kind = %kind, "no handlers for event");
            return Ok(());
        };

        let mut first_error = None;
        for handler in handlers {
            if let Err(err) = handler.handle(event, self).await {
                tracing::warn!(event_kind = %kind, error = %err, "event handler failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Delivers the event on a spawned task; errors are only logged.
    pub fn publish_async(&self, event: DomainEvent) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(err) = dispatcher.publish(&event).await {
                tracing::warn!(
                    event_kind = %event.kind(),
                    error = %err,
                    "asynchronous event delivery failed"
                );
            }
        })
    }
}
