//! The [`Engine`] trait is the only view the orchestrator has of the
//! transcoder.
//!
//! An engine owns a private "virtual filesystem": inputs are written into it
//! by name, commands refer to those names, and outputs are read back by name.
//! The namespace is unrelated to the host filesystem.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// A loaded transcoding engine.
///
/// Implementations must tolerate concurrent calls; the orchestrator overlaps
/// the calls of one wave but never issues unbounded parallel work.
#[async_trait]
pub trait Engine: Send + Sync {
    /// A short, human-readable name (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    /// Store `bytes` in the virtual filesystem under `name`.
    ///
    /// Fails with [`mb_core::Error::EngineIo`].
    async fn write_input(&self, name: &str, bytes: Bytes) -> mb_core::Result<()>;

    /// Execute one command. Names in `args` refer to virtual files.
    ///
    /// Fails with [`mb_core::Error::EngineExec`].
    async fn exec(&self, args: &[String]) -> mb_core::Result<()>;

    /// Read a produced file back out of the virtual filesystem.
    ///
    /// Fails with [`mb_core::Error::EngineIo`].
    async fn read_output(&self, name: &str) -> mb_core::Result<Bytes>;

    /// Remove a virtual file. Callers treat this as best-effort.
    async fn delete_file(&self, name: &str) -> mb_core::Result<()>;
}

impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("name", &self.name()).finish()
    }
}

/// Constructs and loads an [`Engine`].
///
/// Loading is expensive (locating binaries, compiling modules, warming
/// caches); [`crate::EngineHandle`] guarantees it runs at most once at a time.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Build the engine and perform its load step.
    ///
    /// Fails with [`mb_core::Error::EngineLoad`].
    async fn load(&self) -> mb_core::Result<Arc<dyn Engine>>;
}
