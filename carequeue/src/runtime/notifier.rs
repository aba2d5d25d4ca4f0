use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::claim::ClaimStore;
use crate::config::NotifierConfig;
use crate::directory::Directory;
use crate::item::{ProviderId, Region};
use crate::lease::WorkerLease;
use crate::notify::{NotificationMessage, Notifier};
use crate::picker::{NotifyPicker, NotifyStateStore, PickOutcome, PickRequest};
use crate::telemetry;

use super::shutdown::ShutdownToken;

/// Lifecycle of the notifier worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NotifierState {
    /// Built but never started.
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What one notifier cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Regions visited, in order.
    pub regions: Vec<Region>,
    pub notified: Vec<(Region, ProviderId)>,
    pub rate_limited: Vec<Region>,
    pub no_provider: Vec<Region>,
    pub notification_failures: usize,
}

/// Background worker nudging providers about cases waiting in the
/// jump-ball pool.
///
/// Several instances may run against the same stores; the [`WorkerLease`]
/// makes sure only one of them runs cycles at a time.
pub struct UnclaimedCaseNotifier<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    config: NotifierConfig,
    claims: Arc<C>,
    notify_state: Arc<S>,
    picker: NotifyPicker<S>,
    directory: Arc<D>,
    notifier: Arc<dyn Notifier>,
    lease: Arc<dyn WorkerLease>,
    shutdown: ShutdownToken,
    state: Mutex<NotifierState>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<C, S, D> fmt::Debug for UnclaimedCaseNotifier<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnclaimedCaseNotifier")
            .field("config", &self.config)
            .field("claim_store_type", &type_name::<C>())
            .field("notify_state_type", &type_name::<S>())
            .field("directory_type", &type_name::<D>())
            .field("holder", &self.lease.holder())
            .field("state", &*self.state.lock())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<C, S, D> UnclaimedCaseNotifier<C, S, D>
where
    C: ClaimStore + 'static,
    S: NotifyStateStore + 'static,
    D: Directory + 'static,
{
    pub fn new(
        config: NotifierConfig,
        claims: Arc<C>,
        notify_state: Arc<S>,
        picker: NotifyPicker<S>,
        directory: Arc<D>,
        notifier: Arc<dyn Notifier>,
        lease: Arc<dyn WorkerLease>,
    ) -> Self {
        Self {
            config,
            claims,
            notify_state,
            picker,
            directory,
            notifier,
            lease,
            shutdown: ShutdownToken::new(),
            state: Mutex::new(NotifierState::Idle),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn state(&self) -> NotifierState {
        *self.state.lock()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Spawns the worker loop.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() || self.shutdown.is_cancelled() {
            anyhow::bail!("notifier already started");
        }

        *self.state.lock() = NotifierState::Running;
        let worker = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { worker.run().await }));

        tracing::info!(holder = %self.lease.holder(), "unclaimed-case notifier started");
        Ok(())
    }

    /// Signals shutdown and waits for the worker loop to release its lease.
    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(holder = %self.lease.holder(), "stopping unclaimed-case notifier");
        {
            let mut state = self.state.lock();
            if *state == NotifierState::Running {
                *state = NotifierState::Stopping;
            }
        }
        self.shutdown.cancel();

        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => match tokio::time::timeout(self.config.shutdown_timeout(), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("notifier task failed: {:?}", e),
                Err(_) => tracing::warn!("notifier task timed out during shutdown"),
            },
            None => *self.state.lock() = NotifierState::Stopped,
        }
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let poll = self.config.lease_poll_interval();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.lease.acquire(&self.shutdown).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to acquire notifier lease");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll) => continue,
                    }
                }
            }

            let timing = telemetry::record_cycle_start(self.lease.holder());
            let status = match self.run_cycle().await {
                Ok(report) => {
                    tracing::debug!(
                        regions = report.regions.len(),
                        notified = report.notified.len(),
                        "notifier cycle completed"
                    );
                    "completed"
                }
                Err(err) => {
                    tracing::error!(error = %err, "notifier cycle abandoned");
                    "failed"
                }
            };
            telemetry::record_cycle_end(timing, status);

            match self.lease.extend().await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(holder = %self.lease.holder(), "notifier lease lost"),
                Err(err) => tracing::warn!(error = %err, "failed to extend notifier lease"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_interval()) => {}
            }
        }

        if let Err(err) = self.lease.release().await {
            tracing::warn!(error = %err, "failed to release notifier lease");
        }
        *self.state.lock() = NotifierState::Stopped;
        tracing::info!(holder = %self.lease.holder(), "unclaimed-case notifier stopped");
    }

    /// Runs one cycle: visits every region with unclaimed cases and
    /// notifies at most one provider per region.
    ///
    /// Regions already visited in this cycle are passed to the picker to
    /// avoid, spreading notifications across providers. Store and
    /// directory errors abandon the cycle; delivery failures do not.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let span = telemetry::notify_cycle_span(self.lease.holder());
        async move {
            let regions = self.claims.regions_with_unclaimed_cases(Utc::now()).await?;
            let mut report = CycleReport {
                regions: regions.clone(),
                ..CycleReport::default()
            };

            for (index, region) in regions.iter().enumerate() {
                let request = PickRequest {
                    region: region.clone(),
                    regions_to_avoid: regions[..index].to_vec(),
                    region_rate_limit: self.config.region_rate_limit(),
                    provider_rate_limit: self.config.provider_rate_limit(),
                };

                match self.picker.pick_provider_to_notify(&request).await? {
                    PickOutcome::RateLimited => report.rate_limited.push(region.clone()),
                    PickOutcome::NoProviderFound => report.no_provider.push(region.clone()),
                    PickOutcome::Provider(provider_id) => {
                        let profile = self.directory.provider(provider_id).await?;
                        let sent = self
                            .notifier
                            .notify(
                                profile.role,
                                provider_id,
                                profile.account_id,
                                NotificationMessage::UnclaimedCase,
                            )
                            .await;
                        match sent {
                            Ok(()) => {
                                self.notify_state
                                    .record_notified(region, provider_id, Utc::now())
                                    .await?;
                                report.notified.push((region.clone(), provider_id));
                            }
                            Err(err) => {
                                telemetry::record_notification_failed("notifier", provider_id, &err);
                                report.notification_failures += 1;
                            }
                        }
                    }
                }
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
