//! Result registry: exclusive owner of produced artifacts.
//!
//! Every artifact gets exactly one externally visible handle, issued by a
//! [`HandleProvider`] when the artifact is registered and revoked before the
//! artifact's bytes are dropped. Release is idempotent; anything still
//! registered when the registry drops is released then, with a warning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mb_core::events::{EventBus, EventPayload};
use mb_core::media;
use mb_core::{ArtifactId, Error, Result, TaskId};

use crate::sinks::DownloadItem;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque, externally shareable reference to an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues and revokes artifact handles.
pub trait HandleProvider: Send + Sync {
    /// Publish `bytes` and return a handle resolving to them.
    fn issue(&self, artifact_id: ArtifactId, mime_type: &str, bytes: Bytes) -> ArtifactHandle;

    /// Invalidate `handle`. Returns `false` if it was not live.
    fn revoke(&self, handle: &ArtifactHandle) -> bool;
}

/// In-process handle provider: a map from `blob:` URIs to bytes.
#[derive(Debug, Default)]
pub struct BlobStore {
    blobs: DashMap<String, Bytes>,
    revocations: AtomicUsize,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes behind `handle`, if it has not been revoked.
    pub fn resolve(&self, handle: &ArtifactHandle) -> Option<Bytes> {
        self.blobs.get(handle.as_str()).map(|b| b.clone())
    }

    /// Number of handles currently live.
    pub fn live_count(&self) -> usize {
        self.blobs.len()
    }

    /// Number of successful revocations so far.
    pub fn revocations(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }
}

impl HandleProvider for BlobStore {
    fn issue(&self, artifact_id: ArtifactId, _mime_type: &str, bytes: Bytes) -> ArtifactHandle {
        let uri = format!("blob:mediabatch/{artifact_id}/{}", Uuid::new_v4().simple());
        self.blobs.insert(uri.clone(), bytes);
        ArtifactHandle(uri)
    }

    fn revoke(&self, handle: &ArtifactHandle) -> bool {
        let removed = self.blobs.remove(handle.as_str()).is_some();
        if removed {
            self.revocations.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A produced output, owned by the registry.
#[derive(Debug)]
struct Artifact {
    info: ArtifactInfo,
    bytes: Bytes,
}

/// Caller-visible description of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub id: ArtifactId,
    pub task_id: TaskId,
    pub output_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub handle: ArtifactHandle,
    pub created_at: DateTime<Utc>,
}

pub struct ResultRegistry {
    provider: Arc<dyn HandleProvider>,
    artifacts: Mutex<Vec<Artifact>>,
    events: Option<Arc<EventBus>>,
}

impl ResultRegistry {
    pub fn new(provider: Arc<dyn HandleProvider>) -> Self {
        Self {
            provider,
            artifacts: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// Builder: publish release events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Take ownership of `bytes` as the output of `task_id`.
    pub fn register(
        &self,
        task_id: TaskId,
        output_name: impl Into<String>,
        format: &str,
        bytes: Bytes,
    ) -> ArtifactInfo {
        let id = ArtifactId::new();
        let mime_type = media::mime_type_for(format);
        let handle = self.provider.issue(id, &mime_type, bytes.clone());
        let info = ArtifactInfo {
            id,
            task_id,
            output_name: output_name.into(),
            mime_type,
            size_bytes: bytes.len() as u64,
            handle,
            created_at: Utc::now(),
        };
        tracing::debug!(artifact_id = %id, task_id = %task_id, name = %info.output_name, "Artifact registered");
        self.artifacts.lock().push(Artifact {
            info: info.clone(),
            bytes,
        });
        info
    }

    /// Every artifact, in registration order.
    pub fn list(&self) -> Vec<ArtifactInfo> {
        self.artifacts.lock().iter().map(|a| a.info.clone()).collect()
    }

    pub fn get(&self, artifact_id: ArtifactId) -> Option<ArtifactInfo> {
        self.artifacts
            .lock()
            .iter()
            .find(|a| a.info.id == artifact_id)
            .map(|a| a.info.clone())
    }

    pub fn find_by_task(&self, task_id: TaskId) -> Option<ArtifactInfo> {
        self.artifacts
            .lock()
            .iter()
            .find(|a| a.info.task_id == task_id)
            .map(|a| a.info.clone())
    }

    /// Name and bytes of one artifact, for a sink.
    pub fn payload(&self, artifact_id: ArtifactId) -> Result<DownloadItem> {
        self.artifacts
            .lock()
            .iter()
            .find(|a| a.info.id == artifact_id)
            .map(Artifact::to_item)
            .ok_or_else(|| Error::not_found("artifact", artifact_id))
    }

    /// Name and bytes of every artifact, in registration order.
    pub fn payloads(&self) -> Vec<DownloadItem> {
        self.artifacts.lock().iter().map(Artifact::to_item).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.lock().iter().map(|a| a.info.size_bytes).sum()
    }

    /// Release the artifact produced by `task_id`. Returns `false` when there
    /// is none (already released, or the task never completed).
    pub fn release_one(&self, task_id: TaskId) -> bool {
        let removed = {
            let mut artifacts = self.artifacts.lock();
            artifacts
                .iter()
                .position(|a| a.info.task_id == task_id)
                .map(|idx| artifacts.remove(idx))
        };
        match removed {
            Some(artifact) => {
                self.discard(artifact);
                true
            }
            None => false,
        }
    }

    /// Release every artifact. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let drained: Vec<Artifact> = std::mem::take(&mut *self.artifacts.lock());
        let count = drained.len();
        for artifact in drained {
            self.discard(artifact);
        }
        if count > 0 {
            tracing::info!(count, "Released all artifacts");
        }
        count
    }

    /// Revoke the handle, then drop the bytes.
    fn discard(&self, artifact: Artifact) {
        let Artifact { info, bytes } = artifact;
        if !self.provider.revoke(&info.handle) {
            tracing::warn!(artifact_id = %info.id, handle = %info.handle, "Artifact handle was already revoked");
        }
        drop(bytes);
        tracing::debug!(artifact_id = %info.id, task_id = %info.task_id, "Artifact released");
        if let Some(ref bus) = self.events {
            bus.publish(EventPayload::ArtifactReleased {
                artifact_id: info.id,
                task_id: info.task_id,
            });
        }
    }
}

impl Artifact {
    fn to_item(&self) -> DownloadItem {
        DownloadItem {
            name: self.info.output_name.clone(),
            mime_type: self.info.mime_type.clone(),
            bytes: self.bytes.clone(),
        }
    }
}

impl Drop for ResultRegistry {
    fn drop(&mut self) {
        let leaked: Vec<Artifact> = std::mem::take(self.artifacts.get_mut());
        for artifact in leaked {
            tracing::warn!(
                artifact_id = %artifact.info.id,
                name = %artifact.info.output_name,
                "Artifact still registered at session end, releasing"
            );
            self.discard(artifact);
        }
    }
}

impl std::fmt::Debug for ResultRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultRegistry")
            .field("artifacts", &self.len())
            .finish_non_exhaustive()
    }
}
