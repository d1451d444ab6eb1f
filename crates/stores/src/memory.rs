//! In-memory store implementations behind `parking_lot` locks.
//!
//! These are the default backends for the gateway and the only ones the
//! core tests need. Message order within a thread is insertion order,
//! which the core keeps chronological.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use sw_domain::error::Error;
use sw_domain::message::{Message, Thread};
use sw_domain::run::{Run, RunStatus};
use sw_domain::Result;

use crate::runlog::RunLog;
use crate::traits::{MessageStore, RunPatch, RunStore, SortOrder, ThreadStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryMessageStore {
    by_thread: RwLock<HashMap<Uuid, Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages across all threads (test helper).
    pub fn len(&self) -> usize {
        self.by_thread.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn add_message(&self, message: Message) -> Result<()> {
        self.by_thread
            .write()
            .entry(message.thread_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn get_messages(
        &self,
        thread_id: Uuid,
        limit: Option<usize>,
        order: SortOrder,
    ) -> Result<Vec<Message>> {
        let map = self.by_thread.read();
        let Some(messages) = map.get(&thread_id) else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(messages.len());
        let out = match order {
            SortOrder::Ascending => messages.iter().take(limit).cloned().collect(),
            SortOrder::Descending => messages.iter().rev().take(limit).cloned().collect(),
        };
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<Uuid, Thread>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.threads.write().insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>> {
        Ok(self.threads.read().get(&id).cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, Run>>,
    /// Insertion order, newest last, for listing.
    order: RwLock<Vec<Uuid>>,
    /// Terminal runs are appended here when configured.
    log: Option<Arc<RunLog>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive terminal runs to a JSONL log.
    pub fn with_log(log: Arc<RunLog>) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: Run) -> Result<()> {
        self.order.write().push(run.id);
        self.runs.write().insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn update_run(&self, id: Uuid, patch: RunPatch) -> Result<()> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("run {id} not found")))?;

        if let Some(status) = patch.status {
            run.advance(status)?;
        }
        if let Some(err) = patch.last_error {
            run.last_error = Some(err);
        }
        if let Some(usage) = patch.usage {
            run.usage = usage;
        }
        if let Some(p) = patch.input_preview {
            run.input_preview = Some(p);
        }
        if let Some(p) = patch.output_preview {
            run.output_preview = Some(p);
        }

        if run.status.is_terminal() {
            if let Some(log) = &self.log {
                log.append(run);
            }
        }
        Ok(())
    }

    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Run>, usize)> {
        let runs = self.runs.read();
        let order = self.order.read();
        let filter = |r: &&Run| status.map_or(true, |s| r.status == s);

        let matching: Vec<&Run> = order
            .iter()
            .rev()
            .filter_map(|id| runs.get(id))
            .filter(filter)
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }
}
