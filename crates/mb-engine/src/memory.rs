//! In-memory passthrough engine.
//!
//! [`MemoryLoader`] produces engines whose virtual filesystem is a hash map
//! and whose "transcode" copies the `-i` input to the final argument. It
//! records call counts and the peak number of overlapping `exec` calls, and
//! can inject failures by file-name substring. Used by `--dry-run` and by the
//! test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{Engine, EngineLoader};

/// Fault injection and timing knobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBehavior {
    /// How long each load takes.
    pub load_delay: Duration,
    /// How long each `exec` takes.
    pub exec_delay: Duration,
    /// `write_input` fails when the virtual name contains any of these.
    pub fail_write_matching: Vec<String>,
    /// `exec` fails when any argument contains any of these.
    pub fail_exec_matching: Vec<String>,
    /// `read_output` fails when the virtual name contains any of these.
    pub fail_read_matching: Vec<String>,
    /// `delete_file` always fails.
    pub fail_delete: bool,
}

/// Call counters shared by a loader and every engine it produced.
#[derive(Debug, Default)]
pub struct EngineStats {
    load_calls: AtomicUsize,
    write_calls: AtomicUsize,
    exec_calls: AtomicUsize,
    read_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    exec_log: Mutex<Vec<Vec<String>>>,
}

impl EngineStats {
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> usize {
        self.exec_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `exec` calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Arguments of every `exec` call, in call order.
    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.exec_log.lock().clone()
    }

    /// Total engine contacts other than loading.
    pub fn total_calls(&self) -> usize {
        self.write_calls() + self.exec_calls() + self.read_calls() + self.delete_calls()
    }
}

/// Decrements the in-flight counter when an `exec` finishes, however it
/// finishes.
struct InFlight<'a>(&'a EngineStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a EngineStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Shared {
    stats: EngineStats,
    files: Mutex<HashMap<String, Bytes>>,
}

/// Loader for in-memory engines.
pub struct MemoryLoader {
    behavior: MemoryBehavior,
    shared: Arc<Shared>,
    failing_loads: AtomicUsize,
}

impl MemoryLoader {
    /// A loader whose engines succeed instantly.
    pub fn new() -> Self {
        Self::with_behavior(MemoryBehavior::default())
    }

    /// A loader with explicit fault injection and timing.
    pub fn with_behavior(behavior: MemoryBehavior) -> Self {
        Self {
            behavior,
            shared: Arc::new(Shared::default()),
            failing_loads: AtomicUsize::new(0),
        }
    }

    /// Builder: make each load take `delay`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.behavior.load_delay = delay;
        self
    }

    /// Builder: make each `exec` take `delay`.
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.behavior.exec_delay = delay;
        self
    }

    /// Builder: fail the first `n` loads.
    pub fn failing_first_loads(self, n: usize) -> Self {
        self.failing_loads.store(n, Ordering::SeqCst);
        self
    }

    /// Counters shared by all engines from this loader.
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Names currently present in the virtual filesystem.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineLoader for MemoryLoader {
    async fn load(&self) -> mb_core::Result<Arc<dyn Engine>> {
        self.shared.stats.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.behavior.load_delay.is_zero() {
            tokio::time::sleep(self.behavior.load_delay).await;
        }

        let should_fail = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(mb_core::Error::EngineLoad(
                "in-memory engine refused to load".into(),
            ));
        }

        Ok(Arc::new(MemoryEngine {
            behavior: self.behavior.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Engine produced by [`MemoryLoader`].
struct MemoryEngine {
    behavior: MemoryBehavior,
    shared: Arc<Shared>,
}

fn matches_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_input(&self, name: &str, bytes: Bytes) -> mb_core::Result<()> {
        self.shared.stats.write_calls.fetch_add(1, Ordering::SeqCst);
        if matches_any(name, &self.behavior.fail_write_matching) {
            return Err(mb_core::Error::engine_io("write", name, "injected write failure"));
        }
        self.shared.files.lock().insert(name.to_string(), bytes);
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> mb_core::Result<()> {
        let stats = &self.shared.stats;
        stats.exec_calls.fetch_add(1, Ordering::SeqCst);
        stats.exec_log.lock().push(args.to_vec());
        let _guard = InFlight::enter(stats);

        if !self.behavior.exec_delay.is_zero() {
            tokio::time::sleep(self.behavior.exec_delay).await;
        }

        if args
            .iter()
            .any(|a| matches_any(a, &self.behavior.fail_exec_matching))
        {
            return Err(mb_core::Error::EngineExec(
                "injected exec failure (exit status 1)".into(),
            ));
        }

        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .ok_or_else(|| mb_core::Error::EngineExec("missing -i argument".into()))?;
        let output = args
            .last()
            .filter(|o| *o != input)
            .ok_or_else(|| mb_core::Error::EngineExec("missing output argument".into()))?;

        let mut files = self.shared.files.lock();
        let data = files
            .get(input.as_str())
            .cloned()
            .ok_or_else(|| mb_core::Error::EngineExec(format!("{input}: No such file")))?;
        files.insert(output.clone(), data);
        Ok(())
    }

    async fn read_output(&self, name: &str) -> mb_core::Result<Bytes> {
        self.shared.stats.read_calls.fetch_add(1, Ordering::SeqCst);
        if matches_any(name, &self.behavior.fail_read_matching) {
            return Err(mb_core::Error::engine_io("read", name, "injected read failure"));
        }
        self.shared
            .files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| mb_core::Error::engine_io("read", name, "no such file"))
    }

    async fn delete_file(&self, name: &str) -> mb_core::Result<()> {
        self.shared.stats.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_delete {
            return Err(mb_core::Error::engine_io("delete", name, "injected delete failure"));
        }
        self.shared.files.lock().remove(name);
        Ok(())
    }
}
