//! # mb-orchestrator
//!
//! Conversion orchestration for mediabatch.
//!
//! - **Tasks** ([`ConversionTask`], [`TaskState`]) -- per-file state machine
//!   with explicit transition methods.
//! - **Store** ([`TaskStore`]) -- concurrent task table that owns input bytes
//!   until a task is claimed.
//! - **Scheduler** ([`BatchScheduler`]) -- runs a batch in fixed-size waves
//!   against the shared [`mb_engine::EngineHandle`].
//! - **Registry** ([`ResultRegistry`]) -- exclusive owner of produced
//!   artifacts and their revocable handles.
//! - **Sinks** ([`DownloadSink`], [`Bundler`]) -- where downloads and zip
//!   bundles go.
//! - **Facade** ([`Orchestrator`]) -- the operations presentation code calls.

pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod scheduler;
pub mod sinks;
pub mod store;
pub mod task;

// ---- Re-exports for convenience ----

pub use orchestrator::{InputFile, Orchestrator, OrchestratorBuilder};
pub use plan::ConversionPlan;
pub use registry::{ArtifactHandle, ArtifactInfo, BlobStore, HandleProvider, ResultRegistry};
pub use scheduler::{BatchRequest, BatchScheduler, BatchSummary};
pub use sinks::{Bundler, DirectorySink, DownloadItem, DownloadSink, MemorySink, ZipBundler};
pub use store::TaskStore;
pub use task::{ConversionTask, TaskState};
