use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::item::{ItemKey, ItemStatus, ProviderId, QueueItem};

/// A single mutation of one provider's queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueTransition {
    /// Add a row. With `dedupe`, suppressed when a row with the same identity
    /// key already exists.
    Insert { item: QueueItem, dedupe: bool },
    /// Delete every row matching the key. Absence is not an error.
    Remove { key: ItemKey },
    /// Compare-and-swap: delete the row matching `item`'s (provider, item,
    /// event type) at `required_current_status` and insert `item`. A silent
    /// no-op when no row matches.
    Replace {
        item: QueueItem,
        required_current_status: ItemStatus,
    },
}

/// Label for a transition variant, used in telemetry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionAction {
    Insert,
    Remove,
    Replace,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Insert => "insert",
            TransitionAction::Remove => "remove",
            TransitionAction::Replace => "replace",
        }
    }
}

impl QueueTransition {
    pub fn insert(item: QueueItem) -> Self {
        Self::Insert {
            item,
            dedupe: false,
        }
    }

    pub fn insert_deduped(item: QueueItem) -> Self {
        Self::Insert { item, dedupe: true }
    }

    pub fn remove(key: ItemKey) -> Self {
        Self::Remove { key }
    }

    pub fn replace(item: QueueItem, required_current_status: ItemStatus) -> Self {
        Self::Replace {
            item,
            required_current_status,
        }
    }

    /// Provider whose queue this transition touches.
    pub fn provider_id(&self) -> ProviderId {
        match self {
            QueueTransition::Insert { item, .. } | QueueTransition::Replace { item, .. } => {
                item.provider_id
            }
            QueueTransition::Remove { key } => key.provider_id,
        }
    }

    pub fn action(&self) -> TransitionAction {
        match self {
            QueueTransition::Insert { .. } => TransitionAction::Insert,
            QueueTransition::Remove { .. } => TransitionAction::Remove,
            QueueTransition::Replace { .. } => TransitionAction::Replace,
        }
    }

    /// Key of the row a `Replace` expects to find.
    pub fn replace_precondition(&self) -> Option<ItemKey> {
        match self {
            QueueTransition::Replace {
                item,
                required_current_status,
            } => Some(ItemKey::new(
                item.provider_id,
                item.item_id,
                item.event_type,
                *required_current_status,
            )),
            _ => None,
        }
    }
}

/// What a batch actually did to the queue.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub inserted: usize,
    pub removed: usize,
    pub replaced: usize,
    /// Inserts suppressed because an identical row already existed.
    pub deduplicated: usize,
    /// Replaces skipped because no row held the required status.
    pub precondition_misses: usize,
}

impl TransitionOutcome {
    /// True when the batch left the queue unchanged.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.removed == 0 && self.replaced == 0
    }

    pub fn merge(&mut self, other: &TransitionOutcome) {
        self.inserted += other.inserted;
        self.removed += other.removed;
        self.replaced += other.replaced;
        self.deduplicated += other.deduplicated;
        self.precondition_misses += other.precondition_misses;
    }
}

/// Checks that every transition targets `provider_id` and that every item
/// to be written is valid. Nothing is applied when this fails.
pub fn validate_batch(
    provider_id: ProviderId,
    transitions: &[QueueTransition],
) -> Result<(), QueueError> {
    for transition in transitions {
        let found = transition.provider_id();
        if found != provider_id {
            return Err(QueueError::ProviderMismatch {
                expected: provider_id,
                found,
            });
        }
        match transition {
            QueueTransition::Insert { item, .. } | QueueTransition::Replace { item, .. } => {
                item.validate()?
            }
            QueueTransition::Remove { .. } => {}
        }
    }
    Ok(())
}

/// Applies a batch to the rows of a single provider's queue, in order.
///
/// The rows are only modified when the whole batch is valid; later
/// transitions observe the effects of earlier ones.
pub fn apply_batch(
    rows: &mut Vec<QueueItem>,
    provider_id: ProviderId,
    transitions: Vec<QueueTransition>,
) -> Result<TransitionOutcome, QueueError> {
    validate_batch(provider_id, &transitions)?;

    let mut outcome = TransitionOutcome::default();
    for transition in transitions {
        match transition {
            QueueTransition::Insert { item, dedupe } => {
                let key = item.key();
                if dedupe && rows.iter().any(|row| row.matches(&key)) {
                    outcome.deduplicated += 1;
                } else {
                    rows.push(item);
                    outcome.inserted += 1;
                }
            }
            QueueTransition::Remove { key } => {
                let before = rows.len();
                rows.retain(|row| !row.matches(&key));
                outcome.removed += before - rows.len();
            }
            QueueTransition::Replace {
                item,
                required_current_status,
            } => {
                let expected = ItemKey::new(
                    item.provider_id,
                    item.item_id,
                    item.event_type,
                    required_current_status,
                );
                let before = rows.len();
                rows.retain(|row| !row.matches(&expected));
                if rows.len() == before {
                    outcome.precondition_misses += 1;
                } else {
                    rows.push(item);
                    outcome.replaced += 1;
                }
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::EventType;

    const DOCTOR: ProviderId = ProviderId(10);

    fn pending(item_id: i64, event_type: EventType) -> QueueItem {
        QueueItem::new(DOCTOR, item_id, event_type, ItemStatus::Pending)
            .with_description("work", "work")
    }

    #[test]
    fn test_dedupe_suppresses_second_pending_item() {
        let mut rows = Vec::new();
        let first = apply_batch(
            &mut rows,
            DOCTOR,
            vec![QueueTransition::insert_deduped(pending(1, EventType::CaseMessage))],
        )
        .unwrap();
        let second = apply_batch(
            &mut rows,
            DOCTOR,
            vec![QueueTransition::insert_deduped(pending(1, EventType::CaseMessage))],
        )
        .unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.deduplicated, 1);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_plain_insert_allows_duplicates() {
        let mut rows = Vec::new();
        let item = pending(1, EventType::CaseMessage);
        let outcome = apply_batch(
            &mut rows,
            DOCTOR,
            vec![
                QueueTransition::insert(item.clone()),
                QueueTransition::insert(item),
            ],
        )
        .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_replace_is_compare_and_swap() {
        let mut rows = vec![QueueItem::new(
            DOCTOR,
            5,
            EventType::PatientVisit,
            ItemStatus::Ongoing,
        )
        .with_description("visit", "visit")];

        let triaged = QueueItem::new(DOCTOR, 5, EventType::PatientVisit, ItemStatus::Triaged)
            .with_description("triaged", "triaged");

        let first = apply_batch(
            &mut rows,
            DOCTOR,
            vec![QueueTransition::replace(triaged.clone(), ItemStatus::Ongoing)],
        )
        .unwrap();
        assert_eq!(first.replaced, 1);

        // The ongoing row is gone, so a second swap changes nothing.
        let second = apply_batch(
            &mut rows,
            DOCTOR,
            vec![QueueTransition::replace(triaged, ItemStatus::Ongoing)],
        )
        .unwrap();
        assert_eq!(second.precondition_misses, 1);
        assert!(second.is_noop());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ItemStatus::Triaged);
    }

    #[test]
    fn test_later_transitions_see_earlier_effects() {
        let mut rows = Vec::new();
        let item = pending(3, EventType::CaseAssignment);
        let outcome = apply_batch(
            &mut rows,
            DOCTOR,
            vec![
                QueueTransition::insert(item.clone()),
                QueueTransition::remove(item.key()),
                QueueTransition::insert_deduped(item),
            ],
        )
        .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.deduplicated, 0);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_remove_of_absent_row_is_not_an_error() {
        let mut rows = Vec::new();
        let outcome = apply_batch(
            &mut rows,
            DOCTOR,
            vec![QueueTransition::remove(ItemKey::new(
                DOCTOR,
                9,
                EventType::CaseMessage,
                ItemStatus::Pending,
            ))],
        )
        .unwrap();
        assert_eq!(outcome, TransitionOutcome::default());
    }

    #[test]
    fn test_invalid_item_rejects_whole_batch() {
        let mut rows = Vec::new();
        let err = apply_batch(
            &mut rows,
            DOCTOR,
            vec![
                QueueTransition::insert(pending(1, EventType::CaseMessage)),
                QueueTransition::insert(pending(2, EventType::CaseMessage).with_description("", "")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, QueueError::InvalidItem { item_id: 2, .. }));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_provider_mismatch_rejects_batch() {
        let mut rows = Vec::new();
        let stranger = QueueItem::new(ProviderId(99), 1, EventType::CaseMessage, ItemStatus::Pending)
            .with_description("x", "x");
        let err = apply_batch(&mut rows, DOCTOR, vec![QueueTransition::insert(stranger)]).unwrap_err();
        assert_eq!(
            err,
            QueueError::ProviderMismatch {
                expected: DOCTOR,
                found: ProviderId(99)
            }
        );
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut rows = vec![pending(1, EventType::CaseMessage)];
        let outcome = apply_batch(&mut rows, DOCTOR, Vec::new()).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(rows.len(), 1);
    }
}
