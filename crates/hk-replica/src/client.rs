use crate::config::ClientConfig;
use crate::error::AppError;
use crate::receipt::NotificationReceiver;
use crate::remote::{Connectivity, HttpRemoteApi, ProbeConnectivity, RemoteApi};
use crate::store::SqliteReplicaStore;
use crate::sync::SyncOrchestrator;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Wires the replica store, remote API, orchestrator and receiver together.
pub struct ReplicaClient {
    store: Arc<SqliteReplicaStore>,
    remote: Arc<HttpRemoteApi>,
    sync: Arc<SyncOrchestrator>,
    receiver: NotificationReceiver,
    swept_at_start: u64,
}

impl ReplicaClient {
    pub async fn start(config: ClientConfig) -> Result<Self, AppError> {
        let connectivity = ProbeConnectivity::new(config.network_probe_addr.clone());
        Self::start_with(config, Arc::new(connectivity)).await
    }

    pub async fn start_with(
        config: ClientConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::Configuration)?;

        let store = Arc::new(SqliteReplicaStore::connect(&config.replica_url).await?);
        let remote = Arc::new(HttpRemoteApi::new(
            &config.api_base_url,
            config.api_token.clone(),
            connectivity.clone(),
        )?);
        let sync = Arc::new(SyncOrchestrator::new(
            store.clone(),
            remote.clone(),
            connectivity,
            config.sync_page_rows,
            Duration::from_secs(config.sync_interval_seconds),
        ));
        let receiver = NotificationReceiver::new(
            store.clone(),
            remote.clone(),
            config.notification_retention_hours,
        );

        let swept = receiver.sweep_expired(Utc::now()).await?;
        sync.start_timer();
        tracing::info!(
            replica = %config.replica_url,
            swept,
            "replica client started"
        );

        Ok(Self {
            store,
            remote,
            sync,
            receiver,
            swept_at_start: swept,
        })
    }

    pub fn store(&self) -> &Arc<SqliteReplicaStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    pub fn receiver(&self) -> &NotificationReceiver {
        &self.receiver
    }

    /// Notifications removed by the retention sweep run during startup.
    pub fn swept_at_start(&self) -> u64 {
        self.swept_at_start
    }

    /// Registers this device's push subscription with the server.
    pub async fn register_push(&self, subscription: &Value) -> Result<(), AppError> {
        self.remote.subscribe_push(subscription).await
    }

    /// Stops the periodic sync and closes the replica database.
    pub async fn shutdown(&self) {
        self.sync.stop_timer();
        self.store.close().await;
    }
}
