//! `FunnelStateStore` — persisted, mergeable session state.
//!
//! Every session is one JSON snapshot under a prefixed key. All mutations
//! run a read-modify-write cycle under an internal mutex, so overlapping
//! merges union their fields instead of clobbering each other, and terminal
//! verification results are applied at most once.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::StepKey;
use crate::error::StoreError;
use crate::state::{FunnelState, VerificationResult, VerificationSlot};
use crate::store::traits::PersistenceStore;

pub struct FunnelStateStore {
    backend: Arc<dyn PersistenceStore>,
    key_prefix: String,
    /// Serializes read-modify-write cycles across overlapping callers.
    write_lock: Mutex<()>,
}

impl FunnelStateStore {
    pub fn new(backend: Arc<dyn PersistenceStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn key(&self, session_id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, session_id)
    }

    /// Create and persist a fresh session at `first_step`.
    pub async fn create(&self, first_step: StepKey) -> Result<FunnelState, StoreError> {
        let state = FunnelState::new(Uuid::new_v4(), first_step);
        let _guard = self.write_lock.lock().await;
        self.persist(state).await
    }

    /// Load the snapshot for a session.
    ///
    /// Absent and corrupt snapshots both surface as `NotFound` — callers
    /// treat the two identically and start fresh.
    pub async fn load(&self, session_id: Uuid) -> Result<FunnelState, StoreError> {
        let bytes = self
            .backend
            .get(&self.key(session_id))
            .await?
            .ok_or(StoreError::NotFound { session_id })?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(%session_id, error = %e, "Corrupt funnel snapshot, treating as absent");
                Err(StoreError::NotFound { session_id })
            }
        }
    }

    /// Persist a full snapshot, bumping its revision.
    pub async fn save(&self, state: FunnelState) -> Result<FunnelState, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.persist(state).await
    }

    /// Union `partial` into the session's fields and re-persist.
    ///
    /// Fields only ever grow or get overwritten; keys are never removed.
    /// A completed session accepts no further field writes — the unchanged
    /// snapshot is returned.
    pub async fn merge(
        &self,
        session_id: Uuid,
        partial: Map<String, Value>,
    ) -> Result<FunnelState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load(session_id).await?;
        if state.completed {
            warn!(%session_id, "Ignoring field merge on a completed session");
            return Ok(state);
        }
        for (key, value) in partial {
            state.fields.insert(key, value);
        }
        self.persist(state).await
    }

    /// Store a terminal verification result, at most once per session.
    ///
    /// A second terminal write is a no-op returning the unchanged snapshot,
    /// which makes duplicate provider callbacks harmless.
    pub async fn set_verification(
        &self,
        session_id: Uuid,
        result: VerificationResult,
    ) -> Result<FunnelState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load(session_id).await?;
        if state.verification.is_terminal() {
            debug!(%session_id, "Verification already decided, ignoring result");
            return Ok(state);
        }
        state.verification = VerificationSlot::Decided { result };
        self.persist(state).await
    }

    /// Mark the verification slot pending, unless already decided.
    pub async fn mark_verification_pending(
        &self,
        session_id: Uuid,
    ) -> Result<FunnelState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load(session_id).await?;
        if state.verification.is_terminal() {
            return Ok(state);
        }
        state.verification = VerificationSlot::Pending;
        self.persist(state).await
    }

    /// Remove the session's snapshot.
    pub async fn clear(&self, session_id: Uuid) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.backend.delete(&self.key(session_id)).await
    }

    /// Write the snapshot with a bumped revision. Callers hold `write_lock`.
    async fn persist(&self, mut state: FunnelState) -> Result<FunnelState, StoreError> {
        state.revision += 1;
        state.updated_at = chrono::Utc::now();
        let bytes = serde_json::to_vec(&state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend.set(&self.key(state.session_id), &bytes).await?;
        Ok(state)
    }
}
