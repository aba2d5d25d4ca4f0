//! Read-side projection of provider queues for client tabs.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::ActionUrl;
use crate::directory::{Directory, PatientProfile};
use crate::error::RoutingError;
use crate::item::{PatientId, ProviderId, QueueItem};
use crate::queue::QueueStore;

/// Which tab of the provider's queue is being rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTab {
    /// Open items in the provider's own inbox.
    Local,
    /// Claimable cases in the provider's regions.
    Global,
    /// Completed items, newest first.
    History,
}

/// One row as a client renders it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueDisplayItem {
    pub id: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    #[serde(rename = "event_description")]
    pub description: String,
    /// Unix seconds of `enqueued_at`.
    pub event_time: i64,
    pub action_url: Option<ActionUrl>,
    pub auth_url: Option<ActionUrl>,
    pub tags: Vec<String>,
}

impl QueueDisplayItem {
    fn from_item(item: QueueItem, patient: Option<&PatientProfile>) -> Self {
        let (first, last) = patient
            .map(|p| (p.first_name.clone(), p.last_name.clone()))
            .unwrap_or_default();
        Self {
            id: format!(
                "{}:{}:{}",
                item.event_type.as_str().to_lowercase(),
                item.status.as_str().to_lowercase(),
                item.item_id
            ),
            patient_first_name: first,
            patient_last_name: last,
            description: item.short_description,
            event_time: item.enqueued_at.timestamp(),
            action_url: item.action_url,
            auth_url: item.auth_url,
            tags: item.tags,
        }
    }
}

/// Renders queue tabs by joining queue rows with patient names.
pub struct QueueView<Q: QueueStore, D: Directory> {
    queue: Arc<Q>,
    directory: Arc<D>,
}

impl<Q: QueueStore, D: Directory> Clone for QueueView<Q, D> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<Q: QueueStore, D: Directory> fmt::Debug for QueueView<Q, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueView")
            .field("queue_type", &type_name::<Q>())
            .field("directory_type", &type_name::<D>())
            .finish()
    }
}

impl<Q: QueueStore, D: Directory> QueueView<Q, D> {
    pub fn new(queue: Arc<Q>, directory: Arc<D>) -> Self {
        Self { queue, directory }
    }

    pub async fn render(
        &self,
        provider_id: ProviderId,
        tab: QueueTab,
    ) -> anyhow::Result<Vec<QueueDisplayItem>> {
        let items = match tab {
            QueueTab::Local => self.queue.pending_items(provider_id).await?,
            QueueTab::Global => self.queue.unclaimed_eligible_items(provider_id).await?,
            QueueTab::History => {
                let mut items = self.queue.completed_items(provider_id).await?;
                items.reverse();
                items
            }
        };
        self.decorate(items).await
    }

    pub async fn local(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueDisplayItem>> {
        self.render(provider_id, QueueTab::Local).await
    }

    pub async fn global(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueDisplayItem>> {
        self.render(provider_id, QueueTab::Global).await
    }

    pub async fn history(&self, provider_id: ProviderId) -> anyhow::Result<Vec<QueueDisplayItem>> {
        self.render(provider_id, QueueTab::History).await
    }

    async fn decorate(&self, items: Vec<QueueItem>) -> anyhow::Result<Vec<QueueDisplayItem>> {
        let mut patients: HashMap<PatientId, Option<PatientProfile>> = HashMap::new();
        for patient_id in items.iter().filter_map(|item| item.patient_id) {
            if patients.contains_key(&patient_id) {
                continue;
            }
            let profile = match self.directory.patient(patient_id).await {
                Ok(profile) => Some(profile),
                Err(err)
                    if matches!(
                        err.downcast_ref::<RoutingError>(),
                        Some(RoutingError::UnknownPatient(_))
                    ) =>
                {
                    tracing::debug!(patient_id = %patient_id, "queue item for unknown patient");
                    None
                }
                Err(err) => return Err(err),
            };
            patients.insert(patient_id, profile);
        }

        Ok(items
            .into_iter()
            .map(|item| {
                let patient = item
                    .patient_id
                    .and_then(|id| patients.get(&id))
                    .and_then(Option::as_ref);
                QueueDisplayItem::from_item(item, patient)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::claim::{ClaimStore, UnclaimedCase};
    use crate::item::{CaseId, EventType, ItemStatus, Region};
    use crate::rules::test_support::{directory, DOCTOR, PATIENT};
    use crate::store::InMemoryCareStore;
    use crate::transition::QueueTransition;

    fn view(store: &InMemoryCareStore) -> QueueView<InMemoryCareStore, InMemoryCareStore> {
        let shared = Arc::new(store.clone());
        QueueView::new(Arc::clone(&shared), shared)
    }

    fn item(item_id: i64, status: ItemStatus, minutes_ago: i64) -> QueueItem {
        QueueItem::new(DOCTOR, item_id, EventType::CaseMessage, status)
            .with_patient(PATIENT)
            .with_description("long", format!("item {item_id}"))
            .with_enqueued_at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_local_tab_joins_patient_names() {
        let store = directory();
        store
            .apply_transitions(
                DOCTOR,
                vec![
                    QueueTransition::insert(item(1, ItemStatus::Pending, 5)),
                    QueueTransition::insert(
                        item(2, ItemStatus::Pending, 1).with_patient(PatientId(999)),
                    ),
                ],
            )
            .await
            .unwrap();

        let rows = view(&store).local(DOCTOR).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "case_message:pending:1");
        assert_eq!(rows[0].patient_first_name, "Ada");
        assert_eq!(rows[0].description, "item 1");
        assert_eq!(rows[1].patient_first_name, "");
        assert_eq!(rows[1].patient_last_name, "");
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = directory();
        store
            .apply_transitions(
                DOCTOR,
                vec![
                    QueueTransition::insert(item(1, ItemStatus::Replied, 30)),
                    QueueTransition::insert(item(2, ItemStatus::Replied, 10)),
                    QueueTransition::insert(item(3, ItemStatus::Pending, 1)),
                ],
            )
            .await
            .unwrap();

        let rows = view(&store).history(DOCTOR).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["case_message:replied:2", "case_message:replied:1"]);
    }

    #[tokio::test]
    async fn test_global_tab_carries_claim_link() {
        let store = directory();
        let region = Region::new("CA");
        store.license_provider(&region, DOCTOR);
        store
            .insert_unclaimed(UnclaimedCase {
                case_id: CaseId(40),
                patient_id: PATIENT,
                visit_id: 7,
                region,
                description: "New visit with Ada Lovelace".into(),
                short_description: "New visit".into(),
                tags: vec!["Acne".into()],
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let rows = view(&store).global(DOCTOR).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].auth_url,
            Some(ActionUrl::ClaimPatientCase {
                patient_id: PATIENT,
                case_id: CaseId(40),
            })
        );
        assert_eq!(rows[0].patient_last_name, "Lovelace");
    }
}
