use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::{DurabilityError, Result};

/// The process-wide single-active-task slot, shared by both managers.
#[derive(Debug, Clone, Default)]
pub struct TaskGate {
    active: Arc<Mutex<Option<String>>>,
}

impl TaskGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for `task_id`, or reports the task already holding it.
    pub fn try_acquire(&self, task_id: &str) -> Result<TaskPermit> {
        let mut active = self.active.lock();
        if let Some(running) = active.as_ref() {
            return Err(DurabilityError::conflict(format!(
                "task {} is already running",
                running
            )));
        }
        *active = Some(task_id.to_string());
        Ok(TaskPermit { gate: self.clone() })
    }

    pub fn active(&self) -> Option<String> {
        self.active.lock().clone()
    }
}

/// Releases the slot on drop.
#[derive(Debug)]
pub struct TaskPermit {
    gate: TaskGate,
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        self.gate.active.lock().take();
    }
}
