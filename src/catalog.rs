//! Static ordered catalog of funnel steps.
//!
//! The catalog is loaded once and never mutated. `next` walks the order,
//! skipping steps whose skip predicate holds for the current session, so
//! population-specific steps (university affiliation, area cluster) never
//! leak branching logic into callers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FunnelError};
use crate::state::{FunnelState, field_keys};

/// Closed set of funnel step identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    /// Login / funnel entry.
    Entry,
    Terms,
    Email,
    Password,
    Profile,
    /// External identity verification.
    Verify,
    /// University affiliation, new identities only.
    Affiliation,
    /// Area cluster placeholder, new identities only.
    Area,
    /// Terminal / home step.
    Complete,
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Entry => "entry",
            Self::Terms => "terms",
            Self::Email => "email",
            Self::Password => "password",
            Self::Profile => "profile",
            Self::Verify => "verify",
            Self::Affiliation => "affiliation",
            Self::Area => "area",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

type SkipPredicate = Arc<dyn Fn(&FunnelState) -> bool + Send + Sync>;

/// Immutable definition of a single funnel step.
#[derive(Clone)]
pub struct StepDefinition {
    pub key: StepKey,
    pub order: u32,
    pub required_fields: BTreeSet<String>,
    skip: Option<SkipPredicate>,
}

impl StepDefinition {
    pub fn new(key: StepKey, order: u32) -> Self {
        Self {
            key,
            order,
            required_fields: BTreeSet::new(),
            skip: None,
        }
    }

    /// Declare fields that must be collected before advancing past this step.
    pub fn require(mut self, fields: &[&str]) -> Self {
        self.required_fields
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Attach a skip predicate; the step is bypassed while it holds.
    pub fn skip_if(
        mut self,
        predicate: impl Fn(&FunnelState) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Arc::new(predicate));
        self
    }

    pub fn is_skipped(&self, state: &FunnelState) -> bool {
        self.skip.as_ref().is_some_and(|p| p(state))
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("key", &self.key)
            .field("order", &self.order)
            .field("required_fields", &self.required_fields)
            .field("has_skip", &self.skip.is_some())
            .finish()
    }
}

/// Ordered, immutable step catalog.
pub struct StepCatalog {
    /// Sorted by `order`, ascending. Non-empty; orders and keys are unique.
    steps: Vec<StepDefinition>,
}

impl StepCatalog {
    /// Build a catalog from definitions, validating uniqueness of orders
    /// and keys.
    pub fn new(mut steps: Vec<StepDefinition>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::InvalidCatalog(
                "catalog must contain at least one step".to_string(),
            ));
        }
        steps.sort_by_key(|s| s.order);
        for pair in steps.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(ConfigError::InvalidCatalog(format!(
                    "duplicate order {} ({} and {})",
                    pair[0].order, pair[0].key, pair[1].key
                )));
            }
        }
        let keys: BTreeSet<String> = steps.iter().map(|s| s.key.to_string()).collect();
        if keys.len() != steps.len() {
            return Err(ConfigError::InvalidCatalog(
                "duplicate step key".to_string(),
            ));
        }
        Ok(Self { steps })
    }

    /// The production registration catalog.
    pub fn standard() -> Self {
        let new_identity_only = |state: &FunnelState| !state.is_new_identity();
        Self {
            steps: vec![
                StepDefinition::new(StepKey::Entry, 1),
                StepDefinition::new(StepKey::Terms, 2).require(&[field_keys::TERMS_ACCEPTED]),
                StepDefinition::new(StepKey::Email, 3).require(&[field_keys::EMAIL]),
                StepDefinition::new(StepKey::Password, 4).require(&[field_keys::PASSWORD]),
                StepDefinition::new(StepKey::Profile, 5)
                    .require(&[field_keys::NICKNAME, field_keys::REGION]),
                StepDefinition::new(StepKey::Verify, 6),
                StepDefinition::new(StepKey::Affiliation, 7)
                    .require(&[field_keys::UNIVERSITY])
                    .skip_if(new_identity_only),
                // Placeholder step: collects nothing, auto-passes.
                StepDefinition::new(StepKey::Area, 8).skip_if(new_identity_only),
                StepDefinition::new(StepKey::Complete, 9),
            ],
        }
    }

    pub fn resolve(&self, key: StepKey) -> Result<&StepDefinition, FunnelError> {
        self.steps
            .iter()
            .find(|s| s.key == key)
            .ok_or(FunnelError::UnknownStep(key))
    }

    pub fn first(&self) -> &StepDefinition {
        &self.steps[0]
    }

    /// The highest-ordered step (home / terminal route target).
    pub fn terminal(&self) -> &StepDefinition {
        &self.steps[self.steps.len() - 1]
    }

    /// First non-skipped step strictly after `current`, or `None` when
    /// `current` is effectively last for this session.
    pub fn next(&self, current: &StepDefinition, state: &FunnelState) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .filter(|s| s.order > current.order)
            .find(|s| !s.is_skipped(state))
    }

    /// Nearest non-skipped step strictly before `current`, or `None` at the
    /// front of the funnel.
    pub fn previous(
        &self,
        current: &StepDefinition,
        state: &FunnelState,
    ) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.order < current.order)
            .find(|s| !s.is_skipped(state))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
