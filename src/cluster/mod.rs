//! # Cluster
//!
//! Everything that tracks the live state of the backend fleet.
//!
//! ## Modules
//!
//! - [`payload`]: Wire formats of `/curstate.json` and `/initstate.json`
//! - [`backend`]: `BackendClient` seam and its HTTP implementation
//! - [`state`]: `ClusterStateStore` and its snapshot types
//! - [`poller`]: Background `FleetPoller` and its control handle

pub mod backend;
pub mod payload;
pub mod poller;
pub mod state;

pub use backend::{BackendClient, Endpoint, FetchError, HttpBackend};
pub use poller::{FleetPoller, PollerError, PollerHandle};
pub use state::{ClusterSnapshot, ClusterStateStore};
