//! Per-session funnel state and the identity verification model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::StepKey;

/// Field keys collected across the funnel.
pub mod field_keys {
    pub const TERMS_ACCEPTED: &str = "terms_accepted";
    pub const EMAIL: &str = "email";
    pub const PASSWORD: &str = "password";
    pub const NICKNAME: &str = "nickname";
    /// Region code, collected on the profile step and read again by the
    /// university lookup on the affiliation step.
    pub const REGION: &str = "region";
    pub const UNIVERSITY: &str = "university";
    pub const AREA: &str = "area";
}

/// Why an identity verification attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// The external call never completed within the budget.
    Timeout,
    /// The provider rejected the authorization code.
    Denied,
    /// Any other provider-side fault.
    Provider(String),
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Denied => write!(f, "denied"),
            Self::Provider(reason) => write!(f, "provider: {reason}"),
        }
    }
}

/// Terminal outcome of the external identity verification.
///
/// Once one of these is stored for a session it is immutable; later
/// callbacks for the same session are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationResult {
    /// The authenticated identity has never registered before.
    New { certification: Value },
    /// The identity is already registered.
    Existing,
    /// The exchange failed; the session survives and routes back to entry.
    Failed { reason: VerificationFailure },
}

/// The verification slot of a session: empty, awaiting the provider, or
/// decided with a terminal result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationSlot {
    #[default]
    None,
    Pending,
    Decided { result: VerificationResult },
}

impl VerificationSlot {
    /// Whether a terminal result is stored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decided { .. })
    }

    pub fn result(&self) -> Option<&VerificationResult> {
        match self {
            Self::Decided { result } => Some(result),
            _ => None,
        }
    }
}

/// One user's in-progress (or completed) registration attempt.
///
/// Mutated only through `FunnelStateStore`; every persisted write produces a
/// new snapshot with a bumped `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelState {
    pub session_id: Uuid,
    pub current_step: StepKey,
    /// Collected fields. Only ever grows or overwrites keys within a session.
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub verification: VerificationSlot,
    /// Terminal: once true the session accepts no further field writes.
    pub completed: bool,
    /// Incremented on every persisted write; the verification bridge uses it
    /// to detect a session that was cleared and recreated mid-flight.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FunnelState {
    /// Fresh session positioned at the funnel's first step.
    pub fn new(session_id: Uuid, first_step: StepKey) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            current_step: first_step,
            fields: Map::new(),
            verification: VerificationSlot::None,
            completed: false,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A field counts as present only when it holds a non-null value.
    pub fn has_field(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(v) if !v.is_null())
    }

    /// Whether verification decided this identity is new to the service.
    /// Population-specific steps key their skip predicates off this.
    pub fn is_new_identity(&self) -> bool {
        matches!(
            self.verification.result(),
            Some(VerificationResult::New { .. })
        )
    }
}
