//! `StepSequencer` — computes and persists step transitions.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::{StepCatalog, StepKey};
use crate::error::FunnelError;
use crate::state::{FunnelState, VerificationResult};
use crate::store::FunnelStateStore;

pub struct StepSequencer {
    catalog: Arc<StepCatalog>,
    store: Arc<FunnelStateStore>,
}

impl StepSequencer {
    pub fn new(catalog: Arc<StepCatalog>, store: Arc<FunnelStateStore>) -> Self {
        Self { catalog, store }
    }

    /// Merge newly collected fields and move to the next non-skipped step.
    ///
    /// Validation runs against the union of existing and new fields before
    /// anything is persisted, so an `IncompleteStep` leaves the session
    /// untouched. When no next step exists the session is marked completed.
    pub async fn advance(
        &self,
        session_id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<FunnelState, FunnelError> {
        let state = self.store.load(session_id).await?;
        if state.completed {
            return Ok(state);
        }
        let current = self.catalog.resolve(state.current_step)?;

        let missing: Vec<String> = current
            .required_fields
            .iter()
            .filter(|key| {
                !state.has_field(key)
                    && !matches!(fields.get(key.as_str()), Some(v) if !v.is_null())
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FunnelError::IncompleteStep {
                step: current.key,
                missing,
            });
        }

        let merged = if fields.is_empty() {
            state
        } else {
            self.store.merge(session_id, fields).await?
        };

        let mut next_state = merged.clone();
        match self.catalog.next(current, &merged) {
            Some(next) => next_state.current_step = next.key,
            None => next_state.completed = true,
        }
        Ok(self.store.save(next_state).await?)
    }

    /// Move to the previous non-skipped step. Collected fields are kept, so
    /// revisited steps show prior answers.
    pub async fn back(&self, session_id: Uuid) -> Result<FunnelState, FunnelError> {
        let state = self.store.load(session_id).await?;
        let current = self.catalog.resolve(state.current_step)?;
        let previous = self
            .catalog
            .previous(current, &state)
            .ok_or(FunnelError::AtStart)?;

        let mut next_state = state;
        next_state.current_step = previous.key;
        Ok(self.store.save(next_state).await?)
    }

    /// Jump directly to `target`, as decided by a verification branch.
    ///
    /// Jumping onto the funnel's effectively-last step marks the session
    /// completed (the terminal/home step is the end of the funnel).
    pub async fn jump(
        &self,
        session_id: Uuid,
        target: StepKey,
    ) -> Result<FunnelState, FunnelError> {
        let state = self.store.load(session_id).await?;
        let target_def = self.catalog.resolve(target)?;

        let mut next_state = state;
        next_state.current_step = target_def.key;
        if self.catalog.next(target_def, &next_state).is_none() {
            next_state.completed = true;
        }
        Ok(self.store.save(next_state).await?)
    }

    /// Single source of truth for verification branch targets.
    ///
    /// Exhaustive over the terminal variants: a new identity continues into
    /// the population-specific steps, an existing one goes straight home,
    /// and a failure returns to the funnel entry.
    pub fn branch_on_verification(result: &VerificationResult) -> StepKey {
        match result {
            VerificationResult::New { .. } => StepKey::Affiliation,
            VerificationResult::Existing => StepKey::Complete,
            VerificationResult::Failed { .. } => StepKey::Entry,
        }
    }
}
