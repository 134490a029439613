//! Unified error type for mediabatch.
//!
//! All crates funnel their failures into [`Error`]. Failed conversion tasks
//! keep only the error's [`ErrorKind`] and message, so the kind is a small
//! `Copy` discriminant that survives serialization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes in mediabatch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input file was larger than the configured maximum. Raised before
    /// any engine interaction.
    #[error("{name} is {size} bytes, exceeding the {max} byte limit")]
    SizeLimitExceeded {
        /// Name of the rejected input.
        name: String,
        /// Declared size of the input.
        size: u64,
        /// Configured maximum size.
        max: u64,
    },

    /// The transcoding engine could not be loaded.
    #[error("Engine load error: {0}")]
    EngineLoad(String),

    /// Reading or writing the engine's virtual filesystem failed.
    #[error("Engine I/O error [{op} {name}]: {message}")]
    EngineIo {
        /// The operation that failed (e.g. "write", "read").
        op: String,
        /// The virtual file involved.
        name: String,
        /// Human-readable error description.
        message: String,
    },

    /// The engine rejected or failed a command.
    #[error("Engine exec error: {0}")]
    EngineExec(String),

    /// Building an archive bundle failed. Originating artifacts stay valid.
    #[error("Bundle error: {0}")]
    Bundle(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation conflicts with work already in progress.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A task state change that the state machine does not allow.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the task was in.
        from: String,
        /// State that was requested.
        to: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`Error`], recorded on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SizeLimitExceeded,
    EngineLoad,
    EngineIo,
    EngineExec,
    Bundle,
    NotFound,
    Validation,
    Conflict,
    InvalidTransition,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SizeLimitExceeded => "size_limit_exceeded",
            Self::EngineLoad => "engine_load",
            Self::EngineIo => "engine_io",
            Self::EngineExec => "engine_exec",
            Self::Bundle => "bundle",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::InvalidTransition => "invalid_transition",
            Self::Io => "io",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            Error::EngineLoad(_) => ErrorKind::EngineLoad,
            Error::EngineIo { .. } => ErrorKind::EngineIo,
            Error::EngineExec(_) => ErrorKind::EngineExec,
            Error::Bundle(_) => ErrorKind::Bundle,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::Io { .. } => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error belongs to a single task and must not affect its
    /// siblings or the shared engine.
    pub fn is_task_scoped(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SizeLimitExceeded | ErrorKind::EngineIo | ErrorKind::EngineExec
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::EngineIo`].
    pub fn engine_io(
        op: impl Into<String>,
        name: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Error::EngineIo {
            op: op.into(),
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidTransition`].
    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
