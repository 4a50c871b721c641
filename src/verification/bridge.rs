//! `IdentityVerificationBridge` — the single in-flight external
//! verification per session.
//!
//! The bridge owns the only suspending operation in the funnel: the network
//! round trip to the identity provider. Duplicate `begin` calls are
//! rejected, the round trip runs under a fixed budget, and a late result
//! for a session that was cleared (or already decided) is dropped instead
//! of applied.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FunnelError, StoreError};
use crate::state::{VerificationFailure, VerificationResult};
use crate::store::FunnelStateStore;
use crate::verification::provider::{AuthProvider, ProviderError};

pub struct IdentityVerificationBridge {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<FunnelStateStore>,
    provider: Arc<dyn AuthProvider>,
    timeout: Duration,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl IdentityVerificationBridge {
    pub fn new(
        store: Arc<FunnelStateStore>,
        provider: Arc<dyn AuthProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                timeout,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Run one verification exchange for the session.
    ///
    /// Rejects with `AlreadyInProgress` while another exchange for the same
    /// session is pending. Resolves to `Failed { Timeout }` when the
    /// provider does not answer within the budget. The result is applied
    /// through the store's idempotent `set_verification`; if the session has
    /// been cleared or the slot already decided by the time the call
    /// returns, the fresh result is discarded silently.
    ///
    /// The exchange runs on a detached task: dropping this future (the user
    /// leaves the verification-pending screen) does not cancel the network
    /// call, and the in-flight slot is released when the exchange resolves.
    pub async fn begin(
        &self,
        session_id: Uuid,
        authorization_code: &str,
    ) -> Result<VerificationResult, FunnelError> {
        {
            let mut in_flight = self.inner.in_flight.lock().await;
            if !in_flight.insert(session_id) {
                return Err(FunnelError::AlreadyInProgress { session_id });
            }
        }
        let inner = Arc::clone(&self.inner);
        let code = authorization_code.to_string();
        let exchange = tokio::spawn(async move {
            let outcome = inner.run(session_id, &code).await;
            inner.in_flight.lock().await.remove(&session_id);
            outcome
        });
        exchange.await.map_err(|e| {
            FunnelError::Store(StoreError::Backend(format!(
                "verification task failed: {e}"
            )))
        })?
    }
}

impl Inner {
    async fn run(
        &self,
        session_id: Uuid,
        authorization_code: &str,
    ) -> Result<VerificationResult, FunnelError> {
        let pending = self.store.mark_verification_pending(session_id).await?;
        if let Some(existing) = pending.verification.result() {
            // Decided before we even started — hand back the stored result.
            return Ok(existing.clone());
        }
        // Tag the request with the revision at launch; a session cleared and
        // recreated mid-flight restarts below this watermark.
        let launch_revision = pending.revision;

        let result = match tokio::time::timeout(
            self.timeout,
            self.provider.exchange_code(authorization_code),
        )
        .await
        {
            Err(_elapsed) => {
                warn!(%session_id, budget = ?self.timeout, "Identity verification timed out");
                VerificationResult::Failed {
                    reason: VerificationFailure::Timeout,
                }
            }
            Ok(Err(ProviderError::Denied)) => VerificationResult::Failed {
                reason: VerificationFailure::Denied,
            },
            Ok(Err(e)) => {
                warn!(%session_id, error = %e, "Identity provider exchange failed");
                VerificationResult::Failed {
                    reason: VerificationFailure::Provider(e.to_string()),
                }
            }
            Ok(Ok(outcome)) if outcome.is_new_user => VerificationResult::New {
                certification: outcome.certification.unwrap_or(serde_json::Value::Null),
            },
            Ok(Ok(_)) => VerificationResult::Existing,
        };

        match self.store.load(session_id).await {
            Err(StoreError::NotFound { .. }) => {
                debug!(%session_id, "Session gone before verification resolved, dropping result");
                Ok(result)
            }
            Err(e) => Err(e.into()),
            Ok(current) => {
                if current.revision < launch_revision {
                    debug!(%session_id, "Session recreated mid-verification, dropping result");
                    return Ok(result);
                }
                if let Some(stored) = current.verification.result() {
                    // A callback beat us to the slot; keep the first result.
                    debug!(%session_id, "Verification already decided, dropping late result");
                    return Ok(stored.clone());
                }
                self.store
                    .set_verification(session_id, result.clone())
                    .await?;
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StepKey;
    use crate::state::VerificationSlot;
    use crate::store::MemoryStore;
    use crate::verification::provider::StaticAuthProvider;
    use serde_json::json;

    fn bridge_with(provider: Arc<dyn AuthProvider>, timeout: Duration) -> IdentityVerificationBridge {
        let store = Arc::new(FunnelStateStore::new(
            Arc::new(MemoryStore::new()),
            "funnel_state",
        ));
        IdentityVerificationBridge::new(store, provider, timeout)
    }

    fn store_of(bridge: &IdentityVerificationBridge) -> &FunnelStateStore {
        &bridge.inner.store
    }

    #[tokio::test]
    async fn resolves_new_identity_and_stores_it() {
        let bridge = bridge_with(
            Arc::new(StaticAuthProvider::new_user(json!({"ci": "1"}))),
            Duration::from_secs(1),
        );
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;

        let result = bridge.begin(id, "code").await.unwrap();
        assert!(matches!(result, VerificationResult::New { .. }));

        let state = store_of(&bridge).load(id).await.unwrap();
        assert_eq!(state.verification.result(), Some(&result));
    }

    #[tokio::test]
    async fn times_out_to_failed() {
        let bridge = bridge_with(
            Arc::new(StaticAuthProvider::existing_user().with_delay(Duration::from_secs(5))),
            Duration::from_millis(20),
        );
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;

        let result = bridge.begin(id, "code").await.unwrap();
        assert_eq!(
            result,
            VerificationResult::Failed {
                reason: VerificationFailure::Timeout
            }
        );
        let state = store_of(&bridge).load(id).await.unwrap();
        assert!(state.verification.is_terminal());
    }

    #[tokio::test]
    async fn duplicate_begin_is_rejected() {
        let bridge = Arc::new(bridge_with(
            Arc::new(StaticAuthProvider::existing_user().with_delay(Duration::from_millis(200))),
            Duration::from_secs(1),
        ));
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.begin(id, "code").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = bridge.begin(id, "code").await;
        assert!(matches!(
            second,
            Err(FunnelError::AlreadyInProgress { .. })
        ));

        // The original future still resolves normally
        let result = first.await.unwrap().unwrap();
        assert_eq!(result, VerificationResult::Existing);
    }

    #[tokio::test]
    async fn dropped_begin_future_does_not_wedge_the_session() {
        let bridge = Arc::new(bridge_with(
            Arc::new(StaticAuthProvider::existing_user().with_delay(Duration::from_millis(100))),
            Duration::from_secs(1),
        ));
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;

        // The user leaves the verification screen mid-exchange
        let abandoned = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.begin(id, "code").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        abandoned.abort();

        // The detached exchange still resolves and releases the slot
        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = store_of(&bridge).load(id).await.unwrap();
        assert!(state.verification.is_terminal());

        let retry = bridge.begin(id, "code").await.unwrap();
        assert_eq!(retry, VerificationResult::Existing);
    }

    #[tokio::test]
    async fn late_result_for_cleared_session_is_dropped() {
        let bridge = Arc::new(bridge_with(
            Arc::new(StaticAuthProvider::existing_user().with_delay(Duration::from_millis(100))),
            Duration::from_secs(1),
        ));
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;

        let task = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.begin(id, "code").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        store_of(&bridge).clear(id).await.unwrap();

        // The future still resolves, but nothing was applied
        task.await.unwrap().unwrap();
        assert!(matches!(
            store_of(&bridge).load(id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn begin_after_decision_returns_stored_result() {
        let bridge = bridge_with(
            Arc::new(StaticAuthProvider::new_user(json!(null))),
            Duration::from_secs(1),
        );
        let id = store_of(&bridge)
            .create(StepKey::Verify)
            .await
            .unwrap()
            .session_id;
        store_of(&bridge)
            .set_verification(id, VerificationResult::Existing)
            .await
            .unwrap();

        // Provider says New, but the stored Existing wins
        let result = bridge.begin(id, "code").await.unwrap();
        assert_eq!(result, VerificationResult::Existing);
        let state = store_of(&bridge).load(id).await.unwrap();
        assert_eq!(
            state.verification,
            VerificationSlot::Decided {
                result: VerificationResult::Existing
            }
        );
    }
}
