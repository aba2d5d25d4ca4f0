use async_trait::async_trait;

use crate::item::{ProviderId, QueueItem};
use crate::transition::{QueueTransition, TransitionOutcome};

/// Trait for backends that hold per-provider work queues.
///
/// Implementors apply transition batches atomically and serve the read-side
/// listings. Listings are ordered by `enqueued_at` ascending, ties broken by
/// insertion order.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Apply a batch of transitions to one provider's queue.
    ///
    /// Either every transition is applied, in order, or none is. Every
    /// transition must target `provider_id`.
    ///
    /// # Arguments
    /// * `provider_id` - Provider whose queue the batch mutates
    /// * `transitions` - Transitions to apply; an empty batch is a no-op
    async fn apply_transitions(
        &self,
        provider_id: ProviderId,
        transitions: Vec<QueueTransition>,
    ) -> anyhow::Result<TransitionOutcome>;

    /// Open (pending or ongoing) items in the provider's inbox.
    async fn pending_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>>;

    /// Completed items forming the provider's history.
    async fn completed_items(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueItem>>;

    /// Jump-ball cases the provider is licensed to claim: unclaimed cases,
    /// plus cases the provider itself holds a live temporary claim on.
    async fn unclaimed_eligible_items(
        &self,
        provider_id: ProviderId,
    ) -> anyhow::Result<Vec<QueueItem>>;
}

/// Assigns 1-based `position_in_queue` in the order given.
pub fn assign_positions(items: &mut [QueueItem]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.position_in_queue = Some(index + 1);
    }
}

/// Stable sort by enqueue time, preserving insertion order on ties.
pub(crate) fn sort_by_enqueued(items: &mut [QueueItem]) {
    items.sort_by_key(|item| item.enqueued_at);
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::item::{EventType, ItemStatus};

    #[test]
    fn test_positions_are_one_based_after_sort() {
        let now = Utc::now();
        let make = |item_id: i64, offset: i64| {
            QueueItem::new(ProviderId(1), item_id, EventType::CaseMessage, ItemStatus::Pending)
                .with_description("m", "m")
                .with_enqueued_at(now + Duration::seconds(offset))
        };
        let mut items = vec![make(1, 30), make(2, 10), make(3, 10), make(4, 0)];

        sort_by_enqueued(&mut items);
        assign_positions(&mut items);

        let order: Vec<_> = items.iter().map(|i| (i.item_id, i.position_in_queue)).collect();
        assert_eq!(
            order,
            vec![(4, Some(1)), (2, Some(2)), (3, Some(3)), (1, Some(4))]
        );
    }
}
