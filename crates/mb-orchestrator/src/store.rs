//! Concurrent task table.
//!
//! Tasks live in a [`DashMap`] keyed by id, with a separate submission-order
//! index so listings are stable. The store also owns each task's raw input
//! bytes and hands them out exactly once, when the task is claimed for
//! conversion.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;

use mb_core::{ArtifactId, Error, Result, TaskId};

use crate::task::{ConversionTask, TaskState};

#[derive(Debug)]
struct Entry {
    task: ConversionTask,
    input: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, Entry>,
    order: RwLock<Vec<TaskId>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. `input` is `None` for tasks rejected at submission.
    pub fn insert(&self, task: ConversionTask, input: Option<Bytes>) {
        let id = task.id;
        self.tasks.insert(id, Entry { task, input });
        self.order.write().push(id);
    }

    pub fn get(&self, id: TaskId) -> Option<ConversionTask> {
        self.tasks.get(&id).map(|e| e.task.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Snapshot of every task in submission order.
    pub fn list(&self) -> Vec<ConversionTask> {
        let order = self.order.read();
        order.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Ids of tasks currently in `state`, in submission order.
    pub fn ids_in_state(&self, state: TaskState) -> Vec<TaskId> {
        let order = self.order.read();
        order
            .iter()
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|e| e.task.state == state))
            .collect()
    }

    /// Number of tasks in `state`.
    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|e| e.task.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Move a task to `Converting` and take its input bytes.
    ///
    /// Fails with [`Error::NotFound`] if the task was removed and with
    /// [`Error::InvalidTransition`] if it is no longer `Pending`.
    pub fn claim(&self, id: TaskId, output_format: &str) -> Result<Bytes> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        if entry.input.is_none() {
            return Err(Error::invalid_transition(entry.task.state, TaskState::Converting));
        }
        entry.task.start(output_format)?;
        entry
            .input
            .take()
            .ok_or_else(|| Error::Internal(format!("task {id} lost its input")))
    }

    /// Move a task to `Completed`.
    pub fn complete(&self, id: TaskId, artifact_id: ArtifactId) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        entry.task.complete(artifact_id)
    }

    /// Move a task to `Failed`, dropping any input it still holds.
    pub fn fail(&self, id: TaskId, cause: &Error) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        entry.task.fail(cause)?;
        entry.input = None;
        Ok(())
    }

    /// Delete a task that is not mid-conversion.
    ///
    /// Fails with [`Error::Conflict`] while the task is `Converting`.
    pub fn remove(&self, id: TaskId) -> Result<ConversionTask> {
        match self
            .tasks
            .remove_if(&id, |_, e| e.task.state != TaskState::Converting)
        {
            Some((_, entry)) => {
                self.order.write().retain(|t| *t != id);
                Ok(entry.task)
            }
            None if self.tasks.contains_key(&id) => Err(Error::Conflict(format!(
                "task {id} is converting and cannot be removed"
            ))),
            None => Err(Error::not_found("task", id)),
        }
    }
}
