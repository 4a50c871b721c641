//! External identity verification — provider seam and in-flight bridge.

pub mod bridge;
pub mod provider;

pub use bridge::IdentityVerificationBridge;
pub use provider::{AuthProvider, HttpAuthProvider, IdentityOutcome, ProviderError, StaticAuthProvider};
