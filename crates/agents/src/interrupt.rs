//! Cooperative interruption of runs.
//!
//! Every run enrolls in the [`InterruptHub`] when its loop spawns and
//! receives a [`StopSignal`] it polls at its suspension points. A worker
//! run enrolls with its planner's run id as parent, so interrupting a
//! planner reaches every run in its delegation chain — including workers
//! of workers — by walking ancestor links.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// Ancestor-walk bound; delegation chains are far shallower in practice.
const MAX_DELEGATION_DEPTH: usize = 32;

/// A run's stop flag, polled cooperatively by its loop.
#[derive(Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }
}

struct Enrollment {
    signal: StopSignal,
    parent: Option<Uuid>,
}

/// Registry of live runs and their delegation parents.
#[derive(Default)]
pub struct InterruptHub {
    enrolled: Mutex<HashMap<Uuid, Enrollment>>,
}

impl InterruptHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a starting run, linking it to the run that delegated it (if
    /// any), and hand back its stop signal.
    pub fn enroll(&self, run_id: Uuid, parent: Option<Uuid>) -> StopSignal {
        let signal = StopSignal::default();
        self.enrolled.lock().insert(
            run_id,
            Enrollment {
                signal: signal.clone(),
                parent,
            },
        );
        signal
    }

    /// Interrupt a run and every live run delegated under it, however
    /// deep. Returns false when the run is not enrolled (already finished
    /// or never started).
    pub fn interrupt(&self, run_id: Uuid) -> bool {
        let enrolled = self.enrolled.lock();
        let Some(target) = enrolled.get(&run_id) else {
            return false;
        };
        target.signal.raise();

        for (id, enrollment) in enrolled.iter() {
            if *id != run_id && descends_from(&enrolled, *id, run_id) {
                enrollment.signal.raise();
            }
        }
        true
    }

    /// Drop a run's enrollment when its loop exits. Descendants that are
    /// still live keep their own enrollments.
    pub fn retire(&self, run_id: Uuid) {
        self.enrolled.lock().remove(&run_id);
    }

    pub fn is_live(&self, run_id: Uuid) -> bool {
        self.enrolled.lock().contains_key(&run_id)
    }
}

/// Walk `run_id`'s parent links and report whether `ancestor` appears.
fn descends_from(
    enrolled: &HashMap<Uuid, Enrollment>,
    run_id: Uuid,
    ancestor: Uuid,
) -> bool {
    let mut cursor = enrolled.get(&run_id).and_then(|e| e.parent);
    for _ in 0..MAX_DELEGATION_DEPTH {
        match cursor {
            Some(id) if id == ancestor => return true,
            Some(id) => cursor = enrolled.get(&id).and_then(|e| e.parent),
            None => return false,
        }
    }
    false
}
