//! `FunnelManager` — the funnel's exposed surface.
//!
//! Ties the catalog, state store, sequencer, verification bridge, and
//! navigation guard together behind one facade. Screens (or the REST
//! layer) only ever talk to this type.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{StepCatalog, StepKey};
use crate::config::FunnelConfig;
use crate::error::{FunnelError, StoreError};
use crate::guard::{NavigationGuard, RouteDecision};
use crate::progress;
use crate::sequencer::StepSequencer;
use crate::state::{FunnelState, VerificationResult};
use crate::store::{FunnelStateStore, PersistenceStore};
use crate::verification::{AuthProvider, IdentityVerificationBridge};

pub struct FunnelManager {
    catalog: Arc<StepCatalog>,
    store: Arc<FunnelStateStore>,
    sequencer: StepSequencer,
    bridge: IdentityVerificationBridge,
    guard: NavigationGuard,
}

impl FunnelManager {
    pub fn new(
        catalog: Arc<StepCatalog>,
        backend: Arc<dyn PersistenceStore>,
        provider: Arc<dyn AuthProvider>,
        config: FunnelConfig,
    ) -> Self {
        let store = Arc::new(FunnelStateStore::new(backend, config.key_prefix.clone()));
        Self {
            sequencer: StepSequencer::new(Arc::clone(&catalog), Arc::clone(&store)),
            bridge: IdentityVerificationBridge::new(
                Arc::clone(&store),
                provider,
                config.verification_timeout,
            ),
            guard: NavigationGuard::new(
                Arc::clone(&catalog),
                Arc::clone(&store),
                config.session_ttl,
            ),
            catalog,
            store,
        }
    }

    /// Enter the funnel: a fresh session at the first catalog step.
    pub async fn start(&self) -> Result<FunnelState, FunnelError> {
        let state = self.store.create(self.catalog.first().key).await?;
        debug!(session_id = %state.session_id, "Funnel session started");
        Ok(state)
    }

    pub async fn current_state(&self, session_id: Uuid) -> Result<FunnelState, FunnelError> {
        Ok(self.store.load(session_id).await?)
    }

    pub async fn progress(&self, session_id: Uuid) -> Result<f64, FunnelError> {
        let state = self.store.load(session_id).await?;
        Ok(progress::fraction(&state, &self.catalog))
    }

    pub async fn advance(
        &self,
        session_id: Uuid,
        fields: Map<String, Value>,
    ) -> Result<FunnelState, FunnelError> {
        self.sequencer.advance(session_id, fields).await
    }

    pub async fn back(&self, session_id: Uuid) -> Result<FunnelState, FunnelError> {
        self.sequencer.back(session_id).await
    }

    /// Run the external identity verification and route its outcome.
    ///
    /// On resolution the branch target is applied through the sequencer:
    /// `New` continues into the affiliation steps, `Existing` jumps straight
    /// home (completing the session), `Failed` returns to the entry step.
    /// A result that was dropped as stale (session cleared mid-flight, or
    /// the slot decided by an earlier callback) does not move the session.
    pub async fn begin_verification(
        &self,
        session_id: Uuid,
        authorization_code: &str,
    ) -> Result<VerificationResult, FunnelError> {
        let result = self.bridge.begin(session_id, authorization_code).await?;

        match self.store.load(session_id).await {
            Err(StoreError::NotFound { .. }) => {
                // Session left mid-verification; nothing to route.
                return Ok(result);
            }
            Err(e) => return Err(e.into()),
            Ok(state) => {
                if state.verification.result() != Some(&result) {
                    debug!(%session_id, "Verification result not applied, skipping branch");
                    return Ok(result);
                }
            }
        }

        let target = self.resolve_branch_target(StepSequencer::branch_on_verification(&result));
        self.sequencer.jump(session_id, target).await?;
        Ok(result)
    }

    /// Guard decision for entering `requested`.
    pub async fn evaluate_route(
        &self,
        session_id: Uuid,
        requested: StepKey,
    ) -> Result<RouteDecision, FunnelError> {
        self.guard.evaluate(session_id, requested).await
    }

    /// Destroy a finished session once the user leaves the terminal step.
    /// A session that is not completed is left intact.
    pub async fn finish(&self, session_id: Uuid) -> Result<(), FunnelError> {
        match self.store.load(session_id).await {
            Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
            Ok(state) if state.completed => {
                self.store.clear(session_id).await?;
                debug!(%session_id, "Completed session cleared");
                Ok(())
            }
            Ok(_) => {
                debug!(%session_id, "Session not completed, keeping state");
                Ok(())
            }
        }
    }

    /// Branch targets are standard keys; a reduced catalog (tests, partial
    /// rollouts) may not carry them all. Fall back to the terminal step for
    /// home and the first step for everything else.
    fn resolve_branch_target(&self, target: StepKey) -> StepKey {
        if self.catalog.resolve(target).is_ok() {
            return target;
        }
        if target == StepKey::Complete {
            self.catalog.terminal().key
        } else {
            self.catalog.first().key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::field_keys;
    use crate::store::MemoryStore;
    use crate::verification::StaticAuthProvider;
    use serde_json::json;

    fn manager(provider: Arc<dyn AuthProvider>) -> FunnelManager {
        FunnelManager::new(
            Arc::new(StepCatalog::standard()),
            Arc::new(MemoryStore::new()),
            provider,
            FunnelConfig::default(),
        )
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn start_positions_at_first_step() {
        let manager = manager(Arc::new(StaticAuthProvider::existing_user()));
        let state = manager.start().await.unwrap();
        assert_eq!(state.current_step, StepKey::Entry);
        assert!(!state.completed);
        assert_eq!(manager.progress(state.session_id).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn new_identity_branches_into_affiliation() {
        let manager = manager(Arc::new(StaticAuthProvider::new_user(json!({"ci": "1"}))));
        let id = manager.start().await.unwrap().session_id;
        manager
            .store
            .save({
                let mut s = manager.store.load(id).await.unwrap();
                s.current_step = StepKey::Verify;
                s
            })
            .await
            .unwrap();

        let result = manager.begin_verification(id, "code").await.unwrap();
        assert!(matches!(result, VerificationResult::New { .. }));

        let state = manager.current_state(id).await.unwrap();
        assert_eq!(state.current_step, StepKey::Affiliation);
        assert!(!state.completed);
    }

    #[tokio::test]
    async fn existing_identity_jumps_home_and_completes() {
        let manager = manager(Arc::new(StaticAuthProvider::existing_user()));
        let id = manager.start().await.unwrap().session_id;

        let result = manager.begin_verification(id, "code").await.unwrap();
        assert_eq!(result, VerificationResult::Existing);

        let state = manager.current_state(id).await.unwrap();
        assert_eq!(state.current_step, StepKey::Complete);
        assert!(state.completed);
        assert_eq!(manager.progress(id).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn finish_clears_only_completed_sessions() {
        let manager = manager(Arc::new(StaticAuthProvider::existing_user()));
        let id = manager.start().await.unwrap().session_id;

        // Not completed yet — finish keeps it
        manager.finish(id).await.unwrap();
        assert!(manager.current_state(id).await.is_ok());

        manager.begin_verification(id, "code").await.unwrap();
        manager.finish(id).await.unwrap();
        assert!(matches!(
            manager.current_state(id).await,
            Err(FunnelError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn advance_collects_fields_through_the_facade() {
        let manager = manager(Arc::new(StaticAuthProvider::existing_user()));
        let id = manager.start().await.unwrap().session_id;

        // Entry has no required fields
        let s = manager.advance(id, Map::new()).await.unwrap();
        assert_eq!(s.current_step, StepKey::Terms);

        let s = manager
            .advance(id, fields(&[(field_keys::TERMS_ACCEPTED, json!(true))]))
            .await
            .unwrap();
        assert_eq!(s.current_step, StepKey::Email);
    }
}
