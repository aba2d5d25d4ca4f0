use async_trait::async_trait;
use carequeue::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Notifier double that records deliveries and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: Arc<Mutex<HashSet<ProviderId>>>,
    fail_all: Arc<Mutex<bool>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub role: Role,
    pub provider_id: ProviderId,
    pub account_id: AccountId,
    pub message: NotificationMessage,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    /// Providers notified, in delivery order.
    pub fn recipients(&self) -> Vec<ProviderId> {
        self.sent.lock().iter().map(|n| n.provider_id).collect()
    }

    pub fn sent_to(&self, provider_id: ProviderId) -> Vec<NotificationMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.provider_id == provider_id)
            .map(|n| n.message)
            .collect()
    }

    pub fn assert_sent_count_eq(&self, expected: usize) {
        let sent = self.sent.lock().len();
        assert_eq!(
            sent, expected,
            "Expected {} notifications, got {}",
            expected, sent
        );
    }

    /// Deliveries to `provider_id` fail until [`Self::recover`].
    pub fn fail_for(&self, provider_id: ProviderId) {
        self.failing.lock().insert(provider_id);
    }

    pub fn fail_all(&self) {
        *self.fail_all.lock() = true;
    }

    pub fn recover(&self) {
        self.failing.lock().clear();
        *self.fail_all.lock() = false;
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        role: Role,
        provider_id: ProviderId,
        account_id: AccountId,
        message: NotificationMessage,
    ) -> anyhow::Result<()> {
        if *self.fail_all.lock() || self.failing.lock().contains(&provider_id) {
            anyhow::bail!("delivery to provider {} refused", provider_id);
        }
        self.sent.lock().push(SentNotification {
            role,
            provider_id,
            account_id,
            message,
        });
        Ok(())
    }
}
