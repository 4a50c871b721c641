//! `NavigationGuard` — validates session invariants on step-route entry.
//!
//! The guard only returns decisions; actual navigation is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{StepCatalog, StepKey};
use crate::error::{FunnelError, StoreError};
use crate::store::FunnelStateStore;

/// What the caller should do with a step-route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "decision", content = "step", rename_all = "snake_case")]
pub enum RouteDecision {
    /// Render the requested step.
    Allow,
    /// Navigate to this step instead.
    RedirectTo(StepKey),
    /// Discard the session and start fresh at the first step.
    Reset,
}

pub struct NavigationGuard {
    catalog: Arc<StepCatalog>,
    store: Arc<FunnelStateStore>,
    session_ttl: Duration,
}

impl NavigationGuard {
    pub fn new(
        catalog: Arc<StepCatalog>,
        store: Arc<FunnelStateStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            session_ttl,
        }
    }

    /// Evaluate entry to `requested` for the session.
    ///
    /// No persisted state (or a stale/corrupt one) resets; a completed
    /// session always redirects home; skipping ahead redirects back to the
    /// current step; revisiting earlier steps is allowed.
    pub async fn evaluate(
        &self,
        session_id: Uuid,
        requested: StepKey,
    ) -> Result<RouteDecision, FunnelError> {
        let state = match self.store.load(session_id).await {
            Ok(state) => state,
            Err(StoreError::NotFound { .. }) => return Ok(RouteDecision::Reset),
            Err(e) => return Err(e.into()),
        };

        let age = Utc::now().signed_duration_since(state.updated_at);
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .unwrap_or(chrono::TimeDelta::MAX);
        if age > ttl {
            debug!(%session_id, "Session stale, resetting");
            self.store.clear(session_id).await?;
            return Ok(RouteDecision::Reset);
        }

        if state.completed {
            return Ok(RouteDecision::RedirectTo(self.catalog.terminal().key));
        }

        let current = match self.catalog.resolve(state.current_step) {
            Ok(def) => def,
            Err(_) => {
                warn!(%session_id, step = %state.current_step, "Session points at an unknown step, resetting");
                self.store.clear(session_id).await?;
                return Ok(RouteDecision::Reset);
            }
        };

        let requested_def = match self.catalog.resolve(requested) {
            Ok(def) => def,
            Err(_) => return Ok(RouteDecision::RedirectTo(current.key)),
        };

        if requested_def.order > current.order {
            return Ok(RouteDecision::RedirectTo(current.key));
        }
        Ok(RouteDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn guard(ttl: Duration) -> NavigationGuard {
        let store = Arc::new(FunnelStateStore::new(
            Arc::new(MemoryStore::new()),
            "funnel_state",
        ));
        NavigationGuard::new(Arc::new(StepCatalog::standard()), store, ttl)
    }

    #[tokio::test]
    async fn missing_session_resets() {
        let guard = guard(Duration::from_secs(3600));
        let decision = guard.evaluate(Uuid::new_v4(), StepKey::Terms).await.unwrap();
        assert_eq!(decision, RouteDecision::Reset);
    }

    #[tokio::test]
    async fn completed_session_redirects_home() {
        let guard = guard(Duration::from_secs(3600));
        let mut state = guard.store.create(StepKey::Complete).await.unwrap();
        state.completed = true;
        let id = guard.store.save(state).await.unwrap().session_id;

        let decision = guard.evaluate(id, StepKey::Email).await.unwrap();
        assert_eq!(decision, RouteDecision::RedirectTo(StepKey::Complete));
    }

    #[tokio::test]
    async fn skipping_ahead_redirects_to_current() {
        let guard = guard(Duration::from_secs(3600));
        let id = guard.store.create(StepKey::Email).await.unwrap().session_id;

        let decision = guard.evaluate(id, StepKey::Profile).await.unwrap();
        assert_eq!(decision, RouteDecision::RedirectTo(StepKey::Email));
    }

    #[tokio::test]
    async fn revisiting_earlier_steps_is_allowed() {
        let guard = guard(Duration::from_secs(3600));
        let id = guard.store.create(StepKey::Password).await.unwrap().session_id;

        assert_eq!(
            guard.evaluate(id, StepKey::Terms).await.unwrap(),
            RouteDecision::Allow
        );
        assert_eq!(
            guard.evaluate(id, StepKey::Password).await.unwrap(),
            RouteDecision::Allow
        );
    }

    #[tokio::test]
    async fn stale_session_is_cleared_and_reset() {
        let guard = guard(Duration::from_millis(30));
        let id = guard.store.create(StepKey::Email).await.unwrap().session_id;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let decision = guard.evaluate(id, StepKey::Email).await.unwrap();
        assert_eq!(decision, RouteDecision::Reset);

        // The snapshot is gone
        assert!(matches!(
            guard.store.load(id).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
