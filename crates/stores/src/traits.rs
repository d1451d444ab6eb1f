//! Store capability traits consumed by the agent core.

use uuid::Uuid;

use sw_domain::message::{Message, Thread};
use sw_domain::run::{Run, RunStatus, RunUsage};
use sw_domain::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Partial update applied to a run record. Status changes go through the
/// run's monotonic transition check.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub usage: Option<RunUsage>,
    pub input_preview: Option<String>,
    pub output_preview: Option<String>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn add_message(&self, message: Message) -> Result<()>;

    /// Fetch up to `limit` messages of a thread. `Descending` returns the
    /// newest messages first (callers reverse for chronological order).
    async fn get_messages(
        &self,
        thread_id: Uuid,
        limit: Option<usize>,
        order: SortOrder,
    ) -> Result<Vec<Message>>;
}

#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(&self, thread: Thread) -> Result<Thread>;

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>>;
}

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<()>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    async fn update_run(&self, id: Uuid, patch: RunPatch) -> Result<()>;

    /// Recent runs, newest first, optionally filtered by status.
    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Run>, usize)>;
}
