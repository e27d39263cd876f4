//! openstack-lb - OpenStack load balancer lifecycle reconciliation
//!
//! This crate manages one load-balancer-with-backends shape (one VIP, one
//! listener, one pool, a fixed algorithm, optional security group, optional
//! floating IP) on behalf of a cluster integration component.
//!
//! The reconciler discovers or creates each sub-resource in dependency order,
//! drives asynchronous OpenStack operations through polling until they reach
//! a stable state, diffs desired vs. actual backend membership, and recovers
//! from partial failures by re-discovering existing resources by name on the
//! next run.
//!
//! # Modules
//!
//! - [`cloud`] - Capability interface for the OpenStack API plus the CLI adapter
//! - [`config`] - Load balancer parameters and cloud credentials
//! - [`lb`] - The [`lb::LoadBalancer`] reconciler state machine
//! - [`poll`] - Wait-until-stable polling for asynchronous cloud resources
//! - [`secgroup`] - Security group ingress rule matching
//! - [`store`] - Persisted per-load-balancer state records
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cloud;
pub mod config;
pub mod error;
pub mod lb;
pub mod poll;
pub mod secgroup;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps CLI defaults, reconciler behavior, and test
// fixtures consistent.

/// Prefix for derived load balancer names
///
/// The full name is `<prefix>-<deployment_id>-<app>`, which keeps names
/// stable across runs for the same app within one deployment and lets the
/// recovery path re-discover partially created resources by name.
pub const LB_NAME_PREFIX: &str = "openstack-lb";

/// Key prefix for persisted load balancer records in the state store
pub const STORE_KEY_PREFIX: &str = "created_lbs";

/// Security group consulted when this component does not manage groups itself
pub const DEFAULT_SECGRP_NAME: &str = "default";

/// Default pool algorithm
pub const DEFAULT_ALGORITHM: &str = "ROUND_ROBIN";

/// Default number of status probes before a pending resource is declared stuck
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Default fixed interval between status probes, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
