//! The [`Orchestrator`] facade.
//!
//! Presentation code talks only to this type. It wires the shared engine
//! handle, the task store, the scheduler, the result registry, and the sinks
//! together, enforces the admission rules at submission, and allows one batch
//! at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use mb_core::config::Config;
use mb_core::events::{Event, EventBus, EventPayload};
use mb_core::{ArtifactId, Error, Result, TaskId};
use mb_engine::{EngineHandle, EngineLoader};

use crate::registry::{ArtifactInfo, BlobStore, HandleProvider, ResultRegistry};
use crate::scheduler::{BatchRequest, BatchScheduler, BatchSummary};
use crate::sinks::{unique_names, Bundler, DownloadItem, DownloadSink, MemorySink, ZipBundler};
use crate::store::TaskStore;
use crate::task::{ConversionTask, TaskState};

/// A file offered for conversion.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Bytes,
    /// Declared size, checked against the size limit.
    pub size: u64,
}

impl InputFile {
    /// An input whose declared size is its byte length.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    config: Config,
    loader: Arc<dyn EngineLoader>,
    events: Option<Arc<EventBus>>,
    handles: Option<Arc<dyn HandleProvider>>,
    sink: Option<Arc<dyn DownloadSink>>,
    bundler: Option<Arc<dyn Bundler>>,
}

impl OrchestratorBuilder {
    /// Share an existing event bus instead of creating one.
    pub fn events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Issue artifact handles from `provider` (default: a [`BlobStore`]).
    pub fn handle_provider(mut self, provider: Arc<dyn HandleProvider>) -> Self {
        self.handles = Some(provider);
        self
    }

    /// Deliver downloads to `sink` (default: a [`MemorySink`]).
    pub fn sink(mut self, sink: Arc<dyn DownloadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build bundles with `bundler` (default: [`ZipBundler`]).
    pub fn bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub fn build(self) -> Orchestrator {
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBus::new(self.config.events.capacity)));
        let handles = self
            .handles
            .unwrap_or_else(|| Arc::new(BlobStore::new()) as Arc<dyn HandleProvider>);
        let engine = Arc::new(EngineHandle::new(self.loader).with_events(events.clone()));
        let store = Arc::new(TaskStore::new());
        let registry = Arc::new(ResultRegistry::new(handles).with_events(events.clone()));
        let scheduler = BatchScheduler::new(
            engine.clone(),
            store.clone(),
            registry.clone(),
            events.clone(),
            self.config.formats.clone(),
        );

        Orchestrator {
            config: self.config,
            events,
            engine,
            store,
            registry,
            scheduler,
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(MemorySink::new()) as Arc<dyn DownloadSink>),
            bundler: self
                .bundler
                .unwrap_or_else(|| Arc::new(ZipBundler) as Arc<dyn Bundler>),
            running: AtomicBool::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Config,
    events: Arc<EventBus>,
    engine: Arc<EngineHandle>,
    store: Arc<TaskStore>,
    registry: Arc<ResultRegistry>,
    scheduler: BatchScheduler,
    sink: Arc<dyn DownloadSink>,
    bundler: Arc<dyn Bundler>,
    running: AtomicBool,
}

/// Clears the running flag when a batch ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn builder(config: Config, loader: Arc<dyn EngineLoader>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            loader,
            events: None,
            handles: None,
            sink: None,
            bundler: None,
        }
    }

    /// An orchestrator with default handle provider, sink, and bundler.
    pub fn new(config: Config, loader: Arc<dyn EngineLoader>) -> Self {
        Self::builder(config, loader).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Load the engine ahead of the first batch.
    pub async fn preload(&self) -> Result<()> {
        self.engine.preload().await
    }

    // -- Submission ----------------------------------------------------------

    /// Create one task per file.
    ///
    /// Files over the size limit become `Failed` tasks immediately and never
    /// reach the engine; the rest stay `Pending` until a batch claims them.
    pub fn submit_files(&self, files: Vec<InputFile>) -> Vec<ConversionTask> {
        let max = self.config.limits.max_file_size;
        let default_format = self.config.formats.default_output_format.as_str();

        files
            .into_iter()
            .map(|file| {
                let mut task = ConversionTask::new(file.name, file.size, default_format);
                self.events.publish(EventPayload::TaskSubmitted {
                    task_id: task.id,
                    name: task.input_name.clone(),
                    size_bytes: task.size_bytes,
                });

                if file.size > max {
                    let err = Error::SizeLimitExceeded {
                        name: task.input_name.clone(),
                        size: file.size,
                        max,
                    };
                    tracing::warn!(task_id = %task.id, error = %err, "Rejected input");
                    // A fresh task is Pending, so this transition cannot fail.
                    if task.fail(&err).is_ok() {
                        self.events.publish(EventPayload::TaskRejected {
                            task_id: task.id,
                            reason: err.to_string(),
                        });
                    }
                    self.store.insert(task.clone(), None);
                } else {
                    tracing::debug!(task_id = %task.id, name = %task.input_name, size = file.size, "Task submitted");
                    self.store.insert(task.clone(), Some(file.bytes));
                }
                task
            })
            .collect()
    }

    // -- Conversion ----------------------------------------------------------

    /// Convert `task_ids` to `output_format` (default format when `None`).
    ///
    /// Returns once every task has settled. Fails with [`Error::Validation`]
    /// for an unsupported format and with [`Error::Conflict`] while another
    /// batch is running; per-task failures are recorded on the tasks.
    pub async fn start_conversion(
        &self,
        task_ids: &[TaskId],
        output_format: Option<&str>,
    ) -> Result<BatchSummary> {
        let output_format = output_format
            .unwrap_or(self.config.formats.default_output_format.as_str())
            .to_ascii_lowercase();
        if !self.config.formats.supports_output(&output_format) {
            return Err(Error::Validation(format!(
                "unsupported output format: {output_format} (expected one of {})",
                self.config.formats.audio_formats.join(", ")
            )));
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict("a batch is already running".into()));
        }
        let _guard = RunningGuard(&self.running);

        let request = BatchRequest {
            task_ids: task_ids.to_vec(),
            max_parallel: self.config.limits.effective_concurrency(),
            output_format,
        };
        Ok(self.scheduler.run_batch(&request).await)
    }

    /// Convert every `Pending` task.
    pub async fn start_pending(&self, output_format: Option<&str>) -> Result<BatchSummary> {
        let ids = self.store.ids_in_state(TaskState::Pending);
        self.start_conversion(&ids, output_format).await
    }

    /// Whether a batch is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -- Queries -------------------------------------------------------------

    /// All tasks in submission order.
    pub fn tasks(&self) -> Vec<ConversionTask> {
        self.store.list()
    }

    pub fn task(&self, id: TaskId) -> Option<ConversionTask> {
        self.store.get(id)
    }

    /// All live artifacts in registration order.
    pub fn artifacts(&self) -> Vec<ArtifactInfo> {
        self.registry.list()
    }

    // -- Removal and release ---------------------------------------------------

    /// Remove a task and release its artifact, if any.
    ///
    /// Fails with [`Error::Conflict`] while the task is converting and with
    /// [`Error::NotFound`] for unknown ids.
    pub fn remove_task(&self, id: TaskId) -> Result<ConversionTask> {
        let task = self.store.remove(id)?;
        let released = self.registry.release_one(id);
        tracing::info!(task_id = %id, name = %task.input_name, released, "Task removed");
        self.events.publish(EventPayload::TaskRemoved { task_id: id });
        Ok(task)
    }

    /// Release every artifact. Tasks stay visible. Returns how many
    /// artifacts were released.
    pub fn shutdown(&self) -> usize {
        let released = self.registry.release_all();
        tracing::info!(released, "Orchestrator shut down");
        released
    }

    // -- Downloads -------------------------------------------------------------

    /// Deliver one artifact to the sink. The artifact stays registered.
    pub async fn download_one(&self, artifact_id: ArtifactId) -> Result<()> {
        let item = self.registry.payload(artifact_id)?;
        self.sink.deliver(&item).await
    }

    /// Deliver every artifact to the sink, one file each. Returns the count.
    ///
    /// Repeated output names are numbered the same way bundle entries are.
    pub async fn download_all_individually(&self) -> Result<usize> {
        let mut items = self.registry.payloads();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        let unique = unique_names(&names);
        for (item, name) in items.iter_mut().zip(unique) {
            item.name = name;
        }
        for item in &items {
            self.sink.deliver(item).await?;
        }
        Ok(items.len())
    }

    /// Pack every artifact into one archive and deliver it to the sink.
    ///
    /// `bundle_name` defaults to the configured name. Fails with
    /// [`Error::Bundle`] when there is nothing to bundle or archiving fails;
    /// the artifacts stay valid either way.
    pub async fn download_as_bundle(&self, bundle_name: Option<&str>) -> Result<DownloadItem> {
        let name = bundle_name
            .unwrap_or(self.config.bundle.default_name.as_str())
            .to_string();
        let items = self.registry.payloads();
        if items.is_empty() {
            return Err(Error::Bundle(format!("{name}: no converted files to bundle")));
        }

        let bundler = Arc::clone(&self.bundler);
        let entries = items.len();
        let bundle_name = name.clone();
        let bundle = tokio::task::spawn_blocking(move || bundler.bundle(&bundle_name, &items))
            .await
            .map_err(|e| Error::Bundle(format!("{name}: bundler panicked: {e}")))??;

        tracing::info!(name = %bundle.name, entries, size = bundle.bytes.len(), "Bundle created");
        self.events.publish(EventPayload::BundleCreated {
            name: bundle.name.clone(),
            entries,
            size_bytes: bundle.bytes.len() as u64,
        });
        self.sink.deliver(&bundle).await?;
        Ok(bundle)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tasks", &self.store.len())
            .field("artifacts", &self.registry.len())
            .field("engine", &self.engine)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mb_core::ErrorKind;
    use mb_engine::MemoryLoader;
    use std::time::Duration;

    fn orchestrator(loader: Arc<MemoryLoader>) -> Orchestrator {
        Orchestrator::new(Config::default(), loader)
    }

    #[tokio::test]
    async fn oversized_input_fails_without_engine_contact() {
        let loader = Arc::new(MemoryLoader::new());
        let mut config = Config::default();
        config.limits.max_file_size = 4;
        let orch = Orchestrator::new(config, loader.clone());

        let tasks = orch.submit_files(vec![
            InputFile::new("small.wav", &b"abcd"[..]),
            InputFile::new("big.wav", &b"abcde"[..]),
        ]);
        assert_eq!(tasks[0].state, TaskState::Pending);
        assert_eq!(tasks[1].state, TaskState::Failed);
        assert_eq!(tasks[1].failure_kind, Some(ErrorKind::SizeLimitExceeded));
        assert_eq!(tasks[1].progress, 0);
        assert_eq!(loader.stats().load_calls(), 0);

        let summary = orch.start_pending(None).await.unwrap();
        assert_eq!(summary.completed, 1);
        // The rejected input never reached the engine.
        assert_eq!(loader.stats().write_calls(), 1);
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected_up_front() {
        let loader = Arc::new(MemoryLoader::new());
        let orch = orchestrator(loader.clone());
        let tasks = orch.submit_files(vec![InputFile::new("a.wav", &b"x"[..])]);

        assert_matches!(
            orch.start_conversion(&[tasks[0].id], Some("aiff")).await,
            Err(Error::Validation(_))
        );
        assert_eq!(orch.task(tasks[0].id).unwrap().state, TaskState::Pending);
        assert_eq!(loader.stats().load_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_batches_conflict() {
        let loader = Arc::new(MemoryLoader::new().with_exec_delay(Duration::from_millis(30)));
        let orch = orchestrator(loader);
        let tasks = orch.submit_files(vec![InputFile::new("a.wav", &b"x"[..])]);
        let id = tasks[0].id;
        let ids = [id];

        let (first, second) = tokio::join!(
            orch.start_conversion(&ids, None),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                orch.start_conversion(&[id], None).await
            }
        );
        assert_eq!(first.unwrap().completed, 1);
        assert_matches!(second, Err(Error::Conflict(_)));
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn remove_releases_artifact() {
        let orch = orchestrator(Arc::new(MemoryLoader::new()));
        let tasks = orch.submit_files(vec![
            InputFile::new("a.wav", &b"1"[..]),
            InputFile::new("b.wav", &b"2"[..]),
        ]);
        orch.start_pending(Some("ogg")).await.unwrap();
        assert_eq!(orch.artifacts().len(), 2);

        orch.remove_task(tasks[0].id).unwrap();
        let left: Vec<_> = orch.artifacts().into_iter().map(|a| a.output_name).collect();
        assert_eq!(left, vec!["b.ogg"]);
        assert_eq!(orch.tasks().len(), 1);
        assert_matches!(orch.remove_task(tasks[0].id), Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn removed_pending_task_is_skipped() {
        let loader = Arc::new(MemoryLoader::new());
        let orch = orchestrator(loader.clone());
        let tasks = orch.submit_files(vec![
            InputFile::new("a.wav", &b"1"[..]),
            InputFile::new("b.wav", &b"2"[..]),
        ]);
        orch.remove_task(tasks[0].id).unwrap();

        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
        let summary = orch.start_conversion(&ids, None).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(loader.stats().write_calls(), 1);
    }

    #[tokio::test]
    async fn bundle_of_nothing_is_a_bundle_error() {
        let orch = orchestrator(Arc::new(MemoryLoader::new()));
        assert_matches!(orch.download_as_bundle(None).await, Err(Error::Bundle(_)));
    }

    #[tokio::test]
    async fn downloads_go_to_sink_and_keep_artifacts() {
        let sink = Arc::new(MemorySink::new());
        let orch = Orchestrator::builder(Config::default(), Arc::new(MemoryLoader::new()))
            .sink(sink.clone())
            .build();
        orch.submit_files(vec![
            InputFile::new("a.wav", &b"1"[..]),
            InputFile::new("clip.mov", &b"2"[..]),
        ]);
        orch.start_pending(Some("wav")).await.unwrap();

        let first = orch.artifacts()[0].id;
        orch.download_one(first).await.unwrap();
        assert_eq!(orch.download_all_individually().await.unwrap(), 2);
        let bundle = orch.download_as_bundle(Some("out.zip")).await.unwrap();

        let names: Vec<_> = sink.items().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a.wav", "a.wav", "clip.mp3", "out.zip"]);
        assert_eq!(bundle.mime_type, "application/zip");
        assert_eq!(orch.artifacts().len(), 2);

        assert_eq!(orch.shutdown(), 2);
        assert!(orch.artifacts().is_empty());
        assert_matches!(orch.download_one(first).await, Err(Error::NotFound { .. }));
    }
}
