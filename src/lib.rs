//! Signup funnel — registration/onboarding funnel orchestrator.
//!
//! Sequences an ordered set of data-collection steps, persists partial
//! registration state across interruptions, and resolves the branch driven
//! by the external identity verification callback.

pub mod catalog;
pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
pub mod progress;
pub mod routes;
pub mod sequencer;
pub mod state;
pub mod store;
pub mod verification;
