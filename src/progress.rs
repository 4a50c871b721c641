//! Normalized progress fraction for the funnel indicator.

use crate::catalog::StepCatalog;
use crate::state::FunnelState;

/// Fraction in `[0, 1]`: the count of non-skipped steps already behind the
/// current one over the count of non-skipped steps.
///
/// Skipped steps count toward neither side, so the indicator never jumps
/// when a step is bypassed. The fraction reaches `1.0` exactly when the
/// session is completed; on the last step it still reads below one.
pub fn fraction(state: &FunnelState, catalog: &StepCatalog) -> f64 {
    if state.completed {
        return 1.0;
    }
    let total = catalog.iter().filter(|d| !d.is_skipped(state)).count();
    if total == 0 {
        return 1.0;
    }
    let current_order = match catalog.resolve(state.current_step) {
        Ok(def) => def.order,
        Err(_) => return 0.0,
    };
    let behind = catalog
        .iter()
        .filter(|d| !d.is_skipped(state) && d.order < current_order)
        .count();
    (behind as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StepDefinition, StepKey};
    use crate::state::{VerificationResult, VerificationSlot};
    use uuid::Uuid;

    fn catalog() -> StepCatalog {
        StepCatalog::new(vec![
            StepDefinition::new(StepKey::Terms, 1),
            StepDefinition::new(StepKey::Email, 2),
            StepDefinition::new(StepKey::Password, 3),
            StepDefinition::new(StepKey::Profile, 4),
        ])
        .unwrap()
    }

    fn state_at(step: StepKey) -> FunnelState {
        FunnelState::new(Uuid::new_v4(), step)
    }

    #[test]
    fn fraction_walks_up_per_step() {
        let catalog = catalog();
        assert_eq!(fraction(&state_at(StepKey::Terms), &catalog), 0.0);
        assert_eq!(fraction(&state_at(StepKey::Email), &catalog), 0.25);
        assert_eq!(fraction(&state_at(StepKey::Password), &catalog), 0.5);
        assert_eq!(fraction(&state_at(StepKey::Profile), &catalog), 0.75);
    }

    #[test]
    fn last_step_stays_below_one_until_completed() {
        let catalog = catalog();
        let mut state = state_at(StepKey::Profile);
        assert!(fraction(&state, &catalog) < 1.0);
        state.completed = true;
        assert_eq!(fraction(&state, &catalog), 1.0);
    }

    #[test]
    fn completed_is_exactly_one() {
        let catalog = catalog();
        let mut state = state_at(StepKey::Profile);
        state.completed = true;
        assert_eq!(fraction(&state, &catalog), 1.0);
    }

    #[test]
    fn skipped_steps_do_not_count_in_the_denominator() {
        // Password is skipped when the email field carries a marker
        let catalog = StepCatalog::new(vec![
            StepDefinition::new(StepKey::Terms, 1),
            StepDefinition::new(StepKey::Email, 2),
            StepDefinition::new(StepKey::Password, 3)
                .skip_if(|s: &FunnelState| s.has_field("sso")),
            StepDefinition::new(StepKey::Profile, 4),
        ])
        .unwrap();

        let mut state = state_at(StepKey::Profile);
        state
            .fields
            .insert("sso".to_string(), serde_json::json!(true));

        // Profile has 2 of 3 non-skipped steps behind it, not 3 of 4
        assert!((fraction(&state, &catalog) - 2.0 / 3.0).abs() < 1e-9);

        state.current_step = StepKey::Email;
        assert!((fraction(&state, &catalog) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn standard_catalog_never_exceeds_one_after_branch() {
        let catalog = StepCatalog::standard();
        let mut state = state_at(StepKey::Affiliation);
        state.verification = VerificationSlot::Decided {
            result: VerificationResult::New {
                certification: serde_json::Value::Null,
            },
        };
        let f = fraction(&state, &catalog);
        assert!(f > 0.0 && f < 1.0);
    }

    #[test]
    fn unresolvable_step_is_zero() {
        let catalog = catalog();
        assert_eq!(fraction(&state_at(StepKey::Area), &catalog), 0.0);
    }
}
