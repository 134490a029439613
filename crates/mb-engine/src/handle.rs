//! Lazily-initialized, shared engine handle.
//!
//! [`EngineHandle`] holds at most one loaded [`Engine`]. The first
//! [`acquire`](EngineHandle::acquire) starts a load; callers arriving while it
//! is in flight await the same shared future instead of starting another
//! load. A failed attempt is cleared so the next caller retries, while every
//! waiter of the failed attempt receives the same error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use mb_core::events::{EventBus, EventPayload};

use crate::engine::{Engine, EngineLoader};

/// Output of one load attempt. The error side is the load failure message so
/// the output stays `Clone` for all waiters.
type LoadOutput = std::result::Result<Arc<dyn Engine>, String>;
type LoadFuture = Shared<BoxFuture<'static, LoadOutput>>;

enum Slot {
    Empty,
    Loading { attempt: u64, future: LoadFuture },
    Ready(Arc<dyn Engine>),
}

/// Reference-counted owner of the single engine instance.
///
/// Cheap to share behind an `Arc`; nothing here is global.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
    events: Option<Arc<EventBus>>,
}

impl EngineHandle {
    /// Create an empty handle. Nothing is loaded until the first
    /// [`acquire`](Self::acquire).
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(Slot::Empty),
            attempts: AtomicU64::new(0),
            events: None,
        }
    }

    /// Builder: publish load outcomes on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Whether an engine instance is cached.
    pub fn is_loaded(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Number of load attempts started so far.
    pub fn load_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Return the engine, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`mb_core::Error::EngineLoad`] if the attempt this call started
    /// or joined failed. A later call starts a fresh attempt.
    pub async fn acquire(&self) -> mb_core::Result<Arc<dyn Engine>> {
        let (attempt, future) = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(engine) => return Ok(Arc::clone(engine)),
                Slot::Loading { attempt, future } => (*attempt, future.clone()),
                Slot::Empty => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let loader = Arc::clone(&self.loader);
                    let future = async move {
                        loader.load().await.map_err(|e| match e {
                            mb_core::Error::EngineLoad(message) => message,
                            other => other.to_string(),
                        })
                    }
                    .boxed()
                    .shared();
                    tracing::info!(attempt, "Loading transcoding engine");
                    *slot = Slot::Loading {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.slot.lock();
        let owns_slot = matches!(&*slot, Slot::Loading { attempt: a, .. } if *a == attempt);
        match result {
            Ok(engine) => {
                if owns_slot {
                    *slot = Slot::Ready(Arc::clone(&engine));
                    drop(slot);
                    tracing::info!(attempt, engine = engine.name(), "Engine loaded");
                    self.publish(EventPayload::EngineLoaded);
                }
                Ok(engine)
            }
            Err(message) => {
                if owns_slot {
                    *slot = Slot::Empty;
                    drop(slot);
                    tracing::error!(attempt, error = %message, "Engine load failed");
                    self.publish(EventPayload::EngineLoadFailed {
                        error: message.clone(),
                    });
                }
                Err(mb_core::Error::EngineLoad(message))
            }
        }
    }

    /// Load the engine ahead of the first batch.
    pub async fn preload(&self) -> mb_core::Result<()> {
        self.acquire().await.map(|_| ())
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(ref bus) = self.events {
            bus.publish(payload);
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.slot.lock() {
            Slot::Empty => "empty",
            Slot::Loading { .. } => "loading",
            Slot::Ready(_) => "ready",
        };
        f.debug_struct("EngineHandle")
            .field("state", &state)
            .field("attempts", &self.load_attempts())
            .finish_non_exhaustive()
    }
}
