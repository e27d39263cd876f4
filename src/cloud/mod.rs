//! Capability interface for the OpenStack API
//!
//! The reconciler depends only on the [`LbClient`] trait; production code
//! uses the [`OpenStackCli`] adapter, tests use a mock. Record types mirror
//! the fields the `openstack` CLI reports in `-f json` output.

mod cli;

pub use cli::OpenStackCli;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors raised by the cloud collaborator
#[derive(Debug, Error)]
pub enum CloudError {
    /// The CLI binary could not be spawned
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// The command that failed to spawn
        command: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The CLI exited non-zero
    #[error("command failed: {command} - {stderr}")]
    CommandFailed {
        /// The command that failed
        command: String,
        /// Captured standard error
        stderr: String,
    },

    /// The CLI output could not be parsed
    #[error("failed to parse output of {command}: {message}")]
    Parse {
        /// The command whose output was malformed
        command: String,
        /// Parse failure detail
        message: String,
    },

    /// A record was missing a field the reconciler requires
    #[error("{resource} record missing field {field}")]
    MissingField {
        /// Resource kind
        resource: String,
        /// The absent field
        field: String,
    },
}

/// Cloud-reported lifecycle state of an asynchronously created resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisioningStatus {
    /// Resource is stable and usable
    Active,
    /// Creation in progress
    PendingCreate,
    /// Update in progress
    PendingUpdate,
    /// Deletion in progress
    PendingDelete,
    /// The cloud reported a provisioning failure
    Error,
    /// Any other status string the backend reports
    Other(String),
}

impl ProvisioningStatus {
    /// Whether the resource is still transitioning and must not be mutated
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingCreate | Self::PendingUpdate | Self::PendingDelete
        )
    }
}

impl From<String> for ProvisioningStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ACTIVE" => Self::Active,
            "PENDING_CREATE" => Self::PendingCreate,
            "PENDING_UPDATE" => Self::PendingUpdate,
            "PENDING_DELETE" => Self::PendingDelete,
            "ERROR" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<ProvisioningStatus> for String {
    fn from(status: ProvisioningStatus) -> Self {
        match status {
            ProvisioningStatus::Active => "ACTIVE".to_string(),
            ProvisioningStatus::PendingCreate => "PENDING_CREATE".to_string(),
            ProvisioningStatus::PendingUpdate => "PENDING_UPDATE".to_string(),
            ProvisioningStatus::PendingDelete => "PENDING_DELETE".to_string(),
            ProvisioningStatus::Error => "ERROR".to_string(),
            ProvisioningStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from(self.clone()))
    }
}

/// A named cloud resource as reported by list/show operations
///
/// Load balancers, listeners, and pools all share this shape; the VIP
/// fields are only populated for load balancers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Cloud-assigned identifier
    #[serde(default)]
    pub id: String,
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Lifecycle state, absent for kinds that provision synchronously
    #[serde(default)]
    pub provisioning_status: Option<ProvisioningStatus>,
    /// VIP address fronting the load balancer
    #[serde(default)]
    pub vip_address: Option<String>,
    /// Neutron port backing the VIP
    #[serde(default)]
    pub vip_port_id: Option<String>,
}

/// A security group ingress rule
///
/// Empty or absent range fields mean "unrestricted"; the distinction between
/// missing and empty differs by backend version, so both are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SgRule {
    /// Destination port range, `"lo:hi"` or a single port
    #[serde(rename = "Port Range", default)]
    pub port_range: Option<String>,
    /// Source CIDR
    #[serde(rename = "IP Range", default)]
    pub ip_range: Option<String>,
}

/// A floating IP mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    /// The internal fixed address the floating IP maps to, if attached
    #[serde(rename = "Fixed IP Address", default)]
    pub fixed_address: Option<String>,
    /// The publicly routable address
    #[serde(rename = "Floating IP Address", default)]
    pub floating_address: String,
}

/// A subnet as reported by the network listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetRecord {
    /// Subnet name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Subnet CIDR
    #[serde(rename = "Subnet", default)]
    pub cidr: String,
}

/// A backend pool member: one address/port pair
///
/// Ordered and hashable so membership lives in explicit unordered-set
/// containers with well-defined equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Backend address
    pub address: String,
    /// Backend port
    pub port: u16,
}

impl Member {
    /// Create a member from an address and port
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Convenience alias for the membership container
pub type MemberSet = BTreeSet<Member>;

/// Capability interface the reconciler consumes
///
/// One method per cloud operation; implementations may raise
/// [`CloudError`] from any of them. The reconciler wraps failures into the
/// domain error with the failed step attached.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LbClient: Send + Sync {
    /// List all load balancers visible to the credentials
    async fn list_loadbalancers(&self) -> Result<Vec<ResourceRecord>, CloudError>;

    /// Create a load balancer (VIP + port) on the given subnet
    async fn create_loadbalancer(
        &self,
        name: &str,
        subnet: &str,
    ) -> Result<ResourceRecord, CloudError>;

    /// Show a single load balancer, for polling and identity capture
    async fn show_loadbalancer(&self, name: &str) -> Result<ResourceRecord, CloudError>;

    /// Resolve a security group name to its id, `None` if absent
    async fn find_secgrp(&self, name: &str) -> Result<Option<String>, CloudError>;

    /// Create a security group, returning its id
    async fn create_secgrp(&self, name: &str) -> Result<String, CloudError>;

    /// List ingress rules for a security group
    async fn list_sg_rules(&self, sg_id: &str) -> Result<Vec<SgRule>, CloudError>;

    /// Create an ingress rule admitting the given address and port
    async fn create_sg_rule(
        &self,
        sg_id: &str,
        address: &str,
        port: u16,
    ) -> Result<(), CloudError>;

    /// Whether port security is enforced on the given port
    async fn get_port_sec_enabled(&self, port_id: &str) -> Result<bool, CloudError>;

    /// Attach a security group to a port
    async fn set_port_secgrp(&self, port_id: &str, sg_id: &str) -> Result<(), CloudError>;

    /// List all listeners
    async fn list_listeners(&self) -> Result<Vec<ResourceRecord>, CloudError>;

    /// Create a TCP listener on the load balancer
    async fn create_listener(
        &self,
        name: &str,
        lb_name: &str,
        port: u16,
    ) -> Result<ResourceRecord, CloudError>;

    /// List all pools
    async fn list_pools(&self) -> Result<Vec<ResourceRecord>, CloudError>;

    /// Create a pool under the listener with the given algorithm
    async fn create_pool(
        &self,
        name: &str,
        listener: &str,
        algorithm: &str,
    ) -> Result<ResourceRecord, CloudError>;

    /// Show a single pool, for polling
    async fn show_pool(&self, name: &str) -> Result<ResourceRecord, CloudError>;

    /// List current members of a pool
    async fn list_members(&self, pool: &str) -> Result<Vec<Member>, CloudError>;

    /// Add one member to a pool
    async fn create_member(
        &self,
        pool: &str,
        member: &Member,
        subnet: &str,
    ) -> Result<(), CloudError>;

    /// Remove one member from a pool
    async fn delete_member(&self, pool: &str, member: &Member) -> Result<(), CloudError>;

    /// List floating IPs
    async fn list_fips(&self) -> Result<Vec<FloatingIp>, CloudError>;

    /// Allocate a floating IP from a network, bound to the given fixed
    /// address and port, returning the floating address
    async fn create_fip(
        &self,
        net: &str,
        fixed_address: &str,
        port_id: &str,
    ) -> Result<String, CloudError>;

    /// List subnets with their CIDRs
    async fn list_subnets(&self) -> Result<Vec<SubnetRecord>, CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_status_round_trips_through_strings() {
        for (text, status) in [
            ("ACTIVE", ProvisioningStatus::Active),
            ("PENDING_CREATE", ProvisioningStatus::PendingCreate),
            ("PENDING_UPDATE", ProvisioningStatus::PendingUpdate),
            ("PENDING_DELETE", ProvisioningStatus::PendingDelete),
            ("ERROR", ProvisioningStatus::Error),
            ("DELETED", ProvisioningStatus::Other("DELETED".to_string())),
        ] {
            assert_eq!(ProvisioningStatus::from(text.to_string()), status);
            assert_eq!(String::from(status), text);
        }
    }

    #[test]
    fn only_pending_states_are_pending() {
        assert!(ProvisioningStatus::PendingCreate.is_pending());
        assert!(ProvisioningStatus::PendingUpdate.is_pending());
        assert!(ProvisioningStatus::PendingDelete.is_pending());
        assert!(!ProvisioningStatus::Active.is_pending());
        assert!(!ProvisioningStatus::Error.is_pending());
        assert!(!ProvisioningStatus::Other("DELETED".to_string()).is_pending());
    }

    #[test]
    fn records_parse_cli_json() {
        let raw = r#"{
            "id": "1234",
            "name": "openstack-lb-abcd-app",
            "provisioning_status": "PENDING_CREATE",
            "vip_address": "10.0.0.5",
            "vip_port_id": "4321"
        }"#;
        let record: ResourceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.id, "1234");
        assert_eq!(
            record.provisioning_status,
            Some(ProvisioningStatus::PendingCreate)
        );
        assert_eq!(record.vip_address.as_deref(), Some("10.0.0.5"));

        // listener/pool records carry no VIP fields
        let raw = r#"{"id": "9", "name": "x", "provisioning_status": "ACTIVE"}"#;
        let record: ResourceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.vip_address, None);
        assert_eq!(record.vip_port_id, None);
    }

    #[test]
    fn sg_rules_use_cli_table_keys() {
        let raw = r#"[{"Port Range": "80:80", "IP Range": "10.0.0.0/8"}, {}]"#;
        let rules: Vec<SgRule> = serde_json::from_str(raw).unwrap();
        assert_eq!(rules[0].port_range.as_deref(), Some("80:80"));
        assert_eq!(rules[0].ip_range.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(rules[1].port_range, None);
        assert_eq!(rules[1].ip_range, None);
    }

    #[test]
    fn floating_ips_use_cli_table_keys() {
        let raw = r#"[{"Fixed IP Address": "1.1.1.1", "Floating IP Address": "4.4.4.4"},
                      {"Fixed IP Address": null, "Floating IP Address": "5.5.5.5"}]"#;
        let fips: Vec<FloatingIp> = serde_json::from_str(raw).unwrap();
        assert_eq!(fips[0].fixed_address.as_deref(), Some("1.1.1.1"));
        assert_eq!(fips[0].floating_address, "4.4.4.4");
        assert_eq!(fips[1].fixed_address, None);
    }

    #[test]
    fn members_order_and_display() {
        let mut set = MemberSet::new();
        set.insert(Member::new("10.0.0.2", 80));
        set.insert(Member::new("10.0.0.1", 80));
        let ordered: Vec<String> = set.iter().map(Member::to_string).collect();
        assert_eq!(ordered, vec!["10.0.0.1:80", "10.0.0.2:80"]);
    }
}
