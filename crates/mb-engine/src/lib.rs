//! # mb-engine
//!
//! The transcoding engine boundary for mediabatch.
//!
//! This crate provides:
//!
//! - **Engine traits** ([`Engine`], [`EngineLoader`]) -- the opaque capability
//!   the orchestrator drives: write input, execute, read output, delete.
//! - **Shared handle** ([`EngineHandle`]) -- lazily loads exactly one engine
//!   and de-duplicates concurrent initialization.
//! - **ffmpeg engine** ([`FfmpegLoader`], [`FfmpegEngine`]) -- runs the ffmpeg
//!   CLI against a private scratch directory acting as the virtual filesystem.
//! - **In-memory engine** ([`MemoryLoader`]) -- passthrough engine with
//!   counters and fault injection.
//! - **Command execution** ([`ToolCommand`]) and tool discovery
//!   ([`tools::check_tools`]).

pub mod command;
pub mod engine;
pub mod ffmpeg;
pub mod handle;
pub mod memory;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use engine::{Engine, EngineLoader};
pub use ffmpeg::{FfmpegEngine, FfmpegLoader};
pub use handle::EngineHandle;
pub use memory::{EngineStats, MemoryBehavior, MemoryLoader};
pub use tools::ToolInfo;
pub use workspace::ScratchDir;
