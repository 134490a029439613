//! Conversion task and its state machine.
//!
//! `Pending → Converting → {Completed, Failed}`, plus `Pending → Failed` for
//! size-limit rejection. Every transition goes through a method on
//! [`ConversionTask`]; a disallowed move returns
//! [`mb_core::Error::InvalidTransition`] and leaves the task untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mb_core::{ArtifactId, Error, ErrorKind, Result, TaskId};

/// Lifecycle state of a [`ConversionTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Converting,
    Completed,
    Failed,
}

impl TaskState {
    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Converting)
                | (Self::Pending, Self::Failed)
                | (Self::Converting, Self::Completed)
                | (Self::Converting, Self::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Converting => write!(f, "converting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One file's journey through the pipeline.
///
/// The raw input bytes are not part of this struct; the
/// [`TaskStore`](crate::store::TaskStore) owns them until the task leaves
/// `Pending`, so snapshots handed to callers never pin input buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub id: TaskId,
    pub input_name: String,
    pub size_bytes: u64,
    /// Format requested at submission; a batch may override it.
    pub output_format: String,
    pub state: TaskState,
    /// 0 until the task completes, then 100.
    pub progress: u8,
    pub error: Option<String>,
    pub failure_kind: Option<ErrorKind>,
    pub artifact_id: Option<ArtifactId>,
    pub submitted_at: DateTime<Utc>,
}

impl ConversionTask {
    pub fn new(input_name: impl Into<String>, size_bytes: u64, output_format: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            input_name: input_name.into(),
            size_bytes,
            output_format: output_format.into(),
            state: TaskState::Pending,
            progress: 0,
            error: None,
            failure_kind: None,
            artifact_id: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn guard(&self, next: TaskState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::invalid_transition(self.state, next))
        }
    }

    /// `Pending → Converting`.
    pub fn start(&mut self, output_format: &str) -> Result<()> {
        self.guard(TaskState::Converting)?;
        self.state = TaskState::Converting;
        self.output_format = output_format.to_string();
        self.progress = 0;
        Ok(())
    }

    /// `Converting → Completed`, recording the produced artifact.
    pub fn complete(&mut self, artifact_id: ArtifactId) -> Result<()> {
        self.guard(TaskState::Completed)?;
        self.state = TaskState::Completed;
        self.artifact_id = Some(artifact_id);
        self.progress = 100;
        Ok(())
    }

    /// `Pending | Converting → Failed`. Progress is left where it was.
    pub fn fail(&mut self, cause: &Error) -> Result<()> {
        self.guard(TaskState::Failed)?;
        self.state = TaskState::Failed;
        self.error = Some(cause.to_string());
        self.failure_kind = Some(cause.kind());
        Ok(())
    }
}
