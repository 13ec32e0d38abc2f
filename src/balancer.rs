//! # Load Balancer
//!
//! Owns the directory, the cluster state store and the fleet poller, and
//! exposes what request handlers need:
//!
//! - [`decide`](LoadBalancer::decide): where to send a new listener
//! - [`current_servers`](LoadBalancer::current_servers) /
//!   [`current_devices`](LoadBalancer::current_devices): display summaries
//! - [`wake_and_wait_until_worked`](LoadBalancer::wake_and_wait_until_worked)
//! - directory edits, propagated to the store before the poller is woken

use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::cluster::backend::{BackendClient, HttpBackend};
use crate::cluster::poller::{FleetPoller, PollerError, PollerHandle};
use crate::cluster::state::{ClusterStateStore, DeviceSummary, ServerSummary};
use crate::common::config::{BalancerConfig, ListenerProfile, PollerConfig, ServerEntry};
use crate::common::directory::{DirectoryError, ProfileId, ServerDirectory, ServerId};
use crate::dispatch::{self, Decision};

pub struct LoadBalancer {
    directory: Arc<ServerDirectory>,
    store: Arc<ClusterStateStore>,
    poller: PollerHandle,
}

impl LoadBalancer {
    /// Build from the config file and start polling over HTTP.
    pub async fn start(config: &BalancerConfig) -> Self {
        let backend = HttpBackend::new(
            config.poller.health_timeout(),
            config.poller.bootstrap_timeout(),
        );
        Self::with_backend(
            Arc::new(ServerDirectory::from_config(config)),
            Arc::new(backend),
            config.poller.clone(),
        )
        .await
    }

    /// Start polling `directory` through an arbitrary backend client.
    ///
    /// Every directory server has a store record once this returns.
    pub async fn with_backend(
        directory: Arc<ServerDirectory>,
        backend: Arc<dyn BackendClient>,
        config: PollerConfig,
    ) -> Self {
        let store = Arc::new(ClusterStateStore::new());
        let poller = FleetPoller::new(store.clone(), directory.clone(), backend, config)
            .spawn()
            .await;

        Self {
            directory,
            store,
            poller,
        }
    }

    /// Best `(server, device, profile)` for `profile_id`, skipping
    /// `excluded` device ids.
    pub async fn decide(&self, profile_id: &str, excluded: &[String]) -> Option<Decision> {
        let profile = self.directory.profile(profile_id).await;
        let snapshot = self.store.snapshot().await;
        dispatch::decide(&snapshot, profile.as_ref(), excluded)
    }

    pub async fn current_servers(&self) -> Vec<ServerSummary> {
        self.store.snapshot().await.server_summaries()
    }

    pub async fn current_devices(&self) -> Vec<DeviceSummary> {
        self.store.snapshot().await.device_summaries()
    }

    pub async fn listener_profiles(&self) -> BTreeMap<ProfileId, ListenerProfile> {
        self.directory.list_listener_profiles().await
    }

    pub async fn wake_and_wait_until_worked(&self) -> Result<(), PollerError> {
        self.poller.wake_and_wait_until_worked().await
    }

    pub async fn add_server(&self, entry: ServerEntry) -> Result<ServerId, PollerError> {
        let id = self.directory.insert_server(entry.clone()).await;
        self.store.add_server(&id, &entry).await;
        info!("➕ Added server '{}' ({})", entry.name, id);
        self.poller.wake_and_wait_until_worked().await?;
        Ok(id)
    }

    /// Replace the entry of an existing server; its state restarts from scratch.
    pub async fn update_server(&self, id: &str, entry: ServerEntry) -> Result<(), BalancerError> {
        if self.directory.server(id).await.is_none() {
            return Err(DirectoryError::UnknownServer(id.to_string()).into());
        }
        self.directory.upsert_server(id, entry.clone()).await;
        self.store.replace_server(id, &entry).await;
        info!("✏️  Updated server '{}' ({})", entry.name, id);
        self.poller.wake_and_wait_until_worked().await?;
        Ok(())
    }

    pub async fn delete_server(&self, id: &str) -> Result<ServerEntry, DirectoryError> {
        let entry = self.directory.remove_server(id).await?;
        self.store.remove_server(id).await;
        info!("➖ Removed server '{}' ({})", entry.name, id);
        Ok(entry)
    }

    pub async fn add_profile(&self, profile: ListenerProfile) -> ProfileId {
        self.directory.insert_profile(profile).await
    }

    pub async fn update_profile(&self, id: &str, profile: ListenerProfile) {
        self.directory.upsert_profile(id, profile).await;
    }

    pub async fn delete_profile(&self, id: &str) -> Result<ListenerProfile, DirectoryError> {
        self.directory.remove_profile(id).await
    }

    /// Stop the background poller and wait for it to exit.
    pub async fn shutdown(&self) {
        self.poller.shutdown();
        self.poller.join().await;
    }
}

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Poller(#[from] PollerError),
}
