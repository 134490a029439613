//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds an [`Orchestrator`] over the in-memory engine with
//! a blob store and memory sink the test can inspect.

#![allow(dead_code)]

use std::sync::Arc;

use mb_core::config::Config;
use mb_engine::MemoryLoader;
use mb_orchestrator::{BlobStore, InputFile, MemorySink, Orchestrator};

pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub loader: Arc<MemoryLoader>,
    pub blobs: Arc<BlobStore>,
    pub sink: Arc<MemorySink>,
}

impl TestHarness {
    /// Default configuration, instant in-memory engine.
    pub fn new() -> Self {
        Self::with_loader(Config::default(), MemoryLoader::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_loader(config, MemoryLoader::new())
    }

    pub fn with_loader(config: Config, loader: MemoryLoader) -> Self {
        let loader = Arc::new(loader);
        let blobs = Arc::new(BlobStore::new());
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::builder(config, loader.clone())
            .handle_provider(blobs.clone())
            .sink(sink.clone())
            .build();
        Self {
            orchestrator,
            loader,
            blobs,
            sink,
        }
    }
}

/// A config with the given wave size.
pub fn config_with_parallel(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.limits.max_concurrent = max_concurrent;
    config
}

/// `n` small audio inputs named `track{i}.wav`.
pub fn wav_inputs(n: usize) -> Vec<InputFile> {
    (0..n)
        .map(|i| InputFile::new(format!("track{i}.wav"), format!("pcm-{i}").into_bytes()))
        .collect()
}
