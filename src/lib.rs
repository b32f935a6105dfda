//! Upstream synchronization library.
//!
//! Reconciles backend registrations published to a shared object store into
//! a reverse proxy's upstream configuration, reloading the proxy only when
//! the rendered configuration actually changes.

pub mod config;
pub mod observability;
pub mod registry;
pub mod sync;
pub mod upstream;

pub use config::schema::SyncConfig;
pub use registry::{ConfiguredStore, RegistryStore};
pub use sync::{PassReport, SyncEngine, SyncError};
