use async_trait::async_trait;
use carequeue::*;
use parking_lot::Mutex;
use std::sync::Arc;

/// One `apply_transitions` call as seen by [`RecordingQueueStore`].
#[derive(Clone, Debug)]
pub struct AppliedBatch {
    pub provider_id: ProviderId,
    pub actions: Vec<TransitionAction>,
    pub outcome: TransitionOutcome,
}

/// Wraps a [`QueueStore`] and records every batch applied through it, in
/// call order.
pub struct RecordingQueueStore<S: QueueStore> {
    inner: Arc<S>,
    batches: Mutex<Vec<AppliedBatch>>,
}

impl<S: QueueStore> RecordingQueueStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn batches(&self) -> Vec<AppliedBatch> {
        self.batches.lock().clone()
    }

    /// Providers whose queues were written, in order.
    pub fn providers_touched(&self) -> Vec<ProviderId> {
        self.batches.lock().iter().map(|b| b.provider_id).collect()
    }
}

#[async_trait]
impl<S: QueueStore> QueueStore for RecordingQueueStore<S> {
    async fn apply_transitions(
        &self,
        provider_id: ProviderId,
        transitions: Vec<QueueTransition>,
    ) -> anyhow::Result<TransitionOutcome> {
        let actions = transitions.iter().map(QueueTransition::action).collect();
        let outcome = self.inner.apply_transitions(provider_id, transitions).await?;
        self.batches.lock().push(AppliedBatch {
            provider_id,
            actions,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    async fn pending_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        self.inner.pending_items(provider_id).await
    }

    async fn completed_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>> {
        self.inner.completed_items(provider_id).await
    }

    async fn unclaimed_eligible_items(
        &self,
        provider_id: ProviderId,
    ) -> anyhow::Result<Vec<QueueItem>> {
        self.inner.unclaimed_eligible_items(provider_id).await
    }
}
