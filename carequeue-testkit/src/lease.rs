use async_trait::async_trait;
use carequeue::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// [`WorkerLease`] whose `extend` answers come from a script.
///
/// `acquire` succeeds immediately unless shutdown is signalled. Once the
/// script runs out, `extend` keeps answering `true`.
#[derive(Clone)]
pub struct ScriptedLease {
    holder: String,
    extends: Arc<Mutex<VecDeque<bool>>>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedLease {
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            extends: Arc::new(Mutex::new(VecDeque::new())),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_extend_script(self, script: impl IntoIterator<Item = bool>) -> Self {
        self.extends.lock().extend(script);
        self
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLease for ScriptedLease {
    async fn acquire(&self, shutdown: &ShutdownToken) -> anyhow::Result<bool> {
        if shutdown.is_cancelled() {
            return Ok(false);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn extend(&self) -> anyhow::Result<bool> {
        Ok(self.extends.lock().pop_front().unwrap_or(true))
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn holder(&self) -> &str {
        &self.holder
    }
}
