//! Session create/teardown orchestration shared by the control API, the
//! idle reaper, and server shutdown.

use std::path::PathBuf;

use crate::allocator::ResourceAllocator;
use crate::pipeline::{self, PipelineConfig, PipelineError};
use crate::session::{SessionRecord, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("failed to create workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Owns the allocator, registry, and pipeline configuration, and runs the
/// session lifecycle: creation registers a record only after the full
/// pipeline has launched; teardown terminates processes, removes the
/// workspace, then drops the registry entry, in that order.
#[derive(Clone)]
pub struct SessionManager {
    registry: SessionRegistry,
    allocator: ResourceAllocator,
    pipeline: PipelineConfig,
    workspace_root: PathBuf,
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        allocator: ResourceAllocator,
        pipeline: PipelineConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            allocator,
            pipeline,
            workspace_root,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Create a session: allocate resources, create the workspace, launch
    /// the pipeline, then register the record. Nothing is registered on
    /// failure, and a half-done create cleans up its workspace before
    /// reporting the error.
    pub async fn create_session(&self) -> Result<SessionRecord, CreateError> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let resources = self.allocator.allocate();
        let workspace = self.workspace_root.join("sessions").join(&session_id);

        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|source| CreateError::Workspace {
                path: workspace.clone(),
                source,
            })?;

        let processes = match self.pipeline.launch(&session_id, resources, &workspace).await {
            Ok(set) => set,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(&workspace).await {
                    tracing::warn!(
                        session = %session_id,
                        path = %workspace.display(),
                        error = %rm,
                        "failed to remove workspace of failed create"
                    );
                }
                return Err(e.into());
            }
        };

        let record = SessionRecord::new(session_id, resources, workspace, processes);
        if self.registry.insert(record.clone()).is_some() {
            tracing::warn!(session = %record.session_id, "session id collision on insert");
        }
        Ok(record)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.registry.get(session_id)
    }

    /// Update a session's last-activity timestamp. Returns `false` if the
    /// session does not exist.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.registry.get(session_id) {
            Some(record) => {
                record.activity.touch();
                true
            }
            None => false,
        }
    }

    /// Tear a session down. Returns `false` if the session does not exist
    /// or another caller already claimed its teardown, so concurrent
    /// deletes (explicit delete racing the reaper) are idempotent and never
    /// double-terminate.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let Some(record) = self.registry.get(session_id) else {
            return false;
        };
        if !record.claim_teardown() {
            return false;
        }
        self.teardown(&record).await;
        true
    }

    /// Tear down every live session, for server shutdown.
    pub async fn drain(&self) {
        for record in self.registry.drain() {
            if record.claim_teardown() {
                self.teardown_processes_and_workspace(&record).await;
            }
        }
    }

    /// The teardown body: terminate processes, remove the workspace, then
    /// remove the registry entry last so a concurrent lookup never finds a
    /// record that has already been fully reclaimed.
    async fn teardown(&self, record: &SessionRecord) {
        self.teardown_processes_and_workspace(record).await;
        let _ = self.registry.remove(&record.session_id);
        tracing::info!(session = %record.session_id, "session deleted");
    }

    async fn teardown_processes_and_workspace(&self, record: &SessionRecord) {
        if let Some(set) = record.processes.lock().take() {
            pipeline::terminate(set);
        }
        if let Err(e) = tokio::fs::remove_dir_all(&record.workspace).await {
            // The workspace may already be gone; anything else is logged and
            // absorbed so delete stays non-blocking.
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    session = %record.session_id,
                    path = %record.workspace.display(),
                    error = %e,
                    "failed to remove session workspace"
                );
            }
        }
    }
}
