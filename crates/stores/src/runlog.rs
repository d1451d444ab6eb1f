//! JSONL archive of terminal runs.
//!
//! Every run that reaches a terminal status is appended to a JSONL file
//! and kept in a bounded in-memory ring for fast listing. On startup the
//! most recent entries are reloaded and the file is pruned if it grew past
//! the ring size.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use sw_domain::run::{Run, RunStatus};

const MAX_RUNS_IN_MEMORY: usize = 2000;

pub struct RunLog {
    recent: RwLock<VecDeque<Run>>,
    log_path: PathBuf,
}

impl RunLog {
    /// Open (or create) the log under `state_dir/runs/runs.jsonl`.
    pub fn new(state_dir: &Path) -> Self {
        let dir = state_dir.join("runs");
        std::fs::create_dir_all(&dir).ok();
        let log_path = dir.join("runs.jsonl");

        let (recent, total_on_disk) = Self::load_recent(&log_path);
        if total_on_disk > recent.len() {
            tracing::info!(
                kept = recent.len(),
                pruned = total_on_disk - recent.len(),
                "pruning run log on disk"
            );
            Self::rewrite_jsonl(&log_path, &recent);
        }

        Self {
            recent: RwLock::new(recent),
            log_path,
        }
    }

    fn load_recent(path: &Path) -> (VecDeque<Run>, usize) {
        let mut runs = VecDeque::new();
        let mut total = 0;
        if let Ok(content) = std::fs::read_to_string(path) {
            let lines: Vec<&str> = content.lines().collect();
            total = lines.len();
            for line in lines.iter().rev().take(MAX_RUNS_IN_MEMORY) {
                if let Ok(run) = serde_json::from_str::<Run>(line) {
                    runs.push_front(run);
                }
            }
        }
        (runs, total)
    }

    fn rewrite_jsonl(path: &Path, runs: &VecDeque<Run>) {
        let tmp = path.with_extension("jsonl.tmp");
        let mut ok = false;
        if let Ok(mut f) = std::fs::File::create(&tmp) {
            ok = true;
            for run in runs {
                if let Ok(json) = serde_json::to_string(run) {
                    if writeln!(f, "{json}").is_err() {
                        ok = false;
                        break;
                    }
                }
            }
        }
        if ok {
            let _ = std::fs::rename(&tmp, path);
        } else {
            let _ = std::fs::remove_file(&tmp);
        }
    }

    /// Append a terminal run. Non-terminal runs are ignored with a warning.
    pub fn append(&self, run: &Run) {
        if !run.status.is_terminal() {
            tracing::warn!(run_id = %run.id, status = ?run.status, "refusing to archive non-terminal run");
            return;
        }

        {
            let mut recent = self.recent.write();
            recent.push_back(run.clone());
            if recent.len() > MAX_RUNS_IN_MEMORY {
                recent.pop_front();
            }
        }

        if let Ok(json) = serde_json::to_string(run) {
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
            {
                let _ = writeln!(file, "{json}");
            }
        }
    }

    /// Archived runs, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<RunStatus>, limit: usize, offset: usize) -> (Vec<Run>, usize) {
        let recent = self.recent.read();
        let filter = |r: &&Run| status.map_or(true, |s| r.status == s);

        let total = recent.iter().rev().filter(filter).count();
        let page = recent
            .iter()
            .rev()
            .filter(filter)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }
}
