//! # Server Directory
//!
//! The operator-maintained list of backend servers and listener profiles.
//! The fleet poller reads addresses from here and the dispatch engine resolves
//! requested profile ids to frequency ranges. Edits only touch the directory;
//! propagating them to the cluster state is the job of
//! [`LoadBalancer`](crate::balancer::LoadBalancer).

use log::warn;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::config::{BalancerConfig, ListenerProfile, ServerEntry};

pub type ServerId = String;
pub type ProfileId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("unknown server id: {0}")]
    UnknownServer(ServerId),
    #[error("unknown listener profile id: {0}")]
    UnknownProfile(ProfileId),
}

#[derive(Debug, Default)]
pub struct ServerDirectory {
    servers: RwLock<BTreeMap<ServerId, ServerEntry>>,
    profiles: RwLock<BTreeMap<ProfileId, ListenerProfile>>,
}

impl ServerDirectory {
    pub fn new(
        servers: BTreeMap<ServerId, ServerEntry>,
        profiles: BTreeMap<ProfileId, ListenerProfile>,
    ) -> Self {
        for (id, profile) in &profiles {
            if !profile.is_valid() {
                warn!(
                    "⚠️  Listener profile '{}' has start {} >= end {}, it will never match",
                    id, profile.start_freq, profile.end_freq
                );
            }
        }

        Self {
            servers: RwLock::new(servers),
            profiles: RwLock::new(profiles),
        }
    }

    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(config.servers.clone(), config.profiles.clone())
    }

    pub async fn list_servers(&self) -> BTreeMap<ServerId, ServerEntry> {
        self.servers.read().await.clone()
    }

    pub async fn server(&self, id: &str) -> Option<ServerEntry> {
        self.servers.read().await.get(id).cloned()
    }

    /// Add a server under a freshly generated id and return that id.
    pub async fn insert_server(&self, entry: ServerEntry) -> ServerId {
        let id = Uuid::new_v4().to_string();
        self.servers.write().await.insert(id.clone(), entry);
        id
    }

    /// Insert or overwrite the entry stored under `id`.
    pub async fn upsert_server(&self, id: &str, entry: ServerEntry) {
        self.servers.write().await.insert(id.to_string(), entry);
    }

    pub async fn remove_server(&self, id: &str) -> Result<ServerEntry, DirectoryError> {
        self.servers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DirectoryError::UnknownServer(id.to_string()))
    }

    pub async fn list_listener_profiles(&self) -> BTreeMap<ProfileId, ListenerProfile> {
        self.profiles.read().await.clone()
    }

    pub async fn profile(&self, id: &str) -> Option<ListenerProfile> {
        self.profiles.read().await.get(id).cloned()
    }

    pub async fn insert_profile(&self, profile: ListenerProfile) -> ProfileId {
        let id = Uuid::new_v4().to_string();
        self.upsert_profile(&id, profile).await;
        id
    }

    pub async fn upsert_profile(&self, id: &str, profile: ListenerProfile) {
        if !profile.is_valid() {
            warn!(
                "⚠️  Listener profile '{}' has start {} >= end {}, it will never match",
                id, profile.start_freq, profile.end_freq
            );
        }
        self.profiles.write().await.insert(id.to_string(), profile);
    }

    pub async fn remove_profile(&self, id: &str) -> Result<ListenerProfile, DirectoryError> {
        self.profiles
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DirectoryError::UnknownProfile(id.to_string()))
    }
}
