//! # Common Components
//!
//! Shared utilities and data structures used across the balancer.
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration parsing
//! - [`directory`]: Operator-maintained list of servers and listener profiles
//! - [`logging`]: Logger setup for the binary

pub mod config;
pub mod directory;
pub mod logging;
