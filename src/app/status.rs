use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::formats::{CompletedStage, PipelineStatus};
use crate::store::{read_json, write_json_atomic};

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self) -> anyhow::Result<Option<PipelineStatus>>;
    async fn put(&self, status: &PipelineStatus) -> anyhow::Result<()>;
}

/// The status document as a single JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct LocalFsStatusStore {
    path: PathBuf,
}

impl LocalFsStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StatusStore for LocalFsStatusStore {
    async fn get(&self) -> anyhow::Result<Option<PipelineStatus>> {
        read_json(&self.path)
            .await
            .with_context(|| format!("read: {}", self.path.display()))
    }

    async fn put(&self, status: &PipelineStatus) -> anyhow::Result<()> {
        write_json_atomic(&self.path, status)
            .await
            .with_context(|| format!("write: {}", self.path.display()))
    }
}

/// Owns the current [`PipelineStatus`] and republishes it on every transition.
///
/// Publishing happens under the same lock as the mutation, so the file always
/// reflects transitions in the order they were made. A failed write is logged
/// and the in-memory snapshot stays authoritative; the next transition retries.
pub struct StatusReporter {
    store: Arc<dyn StatusStore>,
    status: Mutex<PipelineStatus>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            status: Mutex::new(PipelineStatus::default()),
        }
    }

    /// Continues the cycle numbering of a previous process, if any.
    pub async fn resume(store: Arc<dyn StatusStore>) -> Self {
        let previous = match store.get().await {
            Ok(previous) => previous.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(?err, "unreadable status document; starting fresh");
                PipelineStatus::default()
            }
        };
        let status = PipelineStatus {
            cycle_number: previous.cycle_number,
            ..PipelineStatus::default()
        };
        Self {
            store,
            status: Mutex::new(status),
        }
    }

    pub async fn snapshot(&self) -> PipelineStatus {
        self.status.lock().await.clone()
    }

    /// Starts the next cycle and returns its number.
    pub async fn begin_cycle(&self) -> u64 {
        let mut status = self.status.lock().await;
        *status = PipelineStatus {
            running: true,
            cycle_number: status.cycle_number + 1,
            ..PipelineStatus::default()
        };
        self.publish(&status).await;
        status.cycle_number
    }

    pub async fn begin_stage(&self, name: &str) {
        self.update(|status| {
            status.running = true;
            status.current_stage = Some(name.to_owned());
            status.live_message = None;
        })
        .await;
    }

    pub async fn finish_stage(&self, completed: CompletedStage) {
        self.update(|status| {
            status.current_stage = None;
            status.live_message = None;
            status.completed_stages.push(completed);
        })
        .await;
    }

    pub async fn end_cycle(&self, next_run_at: Option<DateTime<Utc>>) {
        self.update(|status| {
            status.running = false;
            status.current_stage = None;
            status.live_message = None;
            status.next_run_at = next_run_at;
        })
        .await;
    }

    pub async fn stopped(&self) {
        self.update(|status| {
            status.running = false;
            status.current_stage = None;
            status.next_run_at = None;
        })
        .await;
    }

    /// Freeform progress text; structured fields are left alone.
    pub async fn live(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|status| status.live_message = Some(message)).await;
    }

    async fn update(&self, mutate: impl FnOnce(&mut PipelineStatus)) {
        let mut status = self.status.lock().await;
        mutate(&mut status);
        self.publish(&status).await;
    }

    async fn publish(&self, status: &PipelineStatus) {
        if let Err(err) = self.store.put(status).await {
            tracing::warn!(?err, "failed to write status document");
        }
    }
}
