//! Persistence layer — session snapshots over an injected key-value medium.

pub mod funnel_store;
pub mod libsql_backend;
pub mod memory;
pub mod traits;

pub use funnel_store::FunnelStateStore;
pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;
pub use traits::PersistenceStore;
