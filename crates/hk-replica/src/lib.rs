//! Device-side replica: a local SQLite copy of the server tables, the sync
//! orchestrator that keeps it current and the push notification receiver.

pub mod client;
pub mod config;
pub mod error;
pub mod receipt;
pub mod remote;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use client::ReplicaClient;
pub use config::ClientConfig;
pub use error::AppError;
pub use receipt::{AlertPreferences, NotificationReceiver, Received};
pub use remote::{Connectivity, HttpRemoteApi, PushOutcome, RemoteApi};
pub use store::{ReplicaStore, SqliteReplicaStore};
pub use sync::{SkipReason, SyncOrchestrator, SyncOutcome, SyncStatusReport};

pub const SERVICE_NAME: &str = "hk-replica";
