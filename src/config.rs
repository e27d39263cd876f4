//! Load balancer parameters and cloud credentials
//!
//! Configuration is explicit: the reconciler receives an [`LbConfig`] at
//! construction and the CLI adapter receives [`CloudCredentials`], rather
//! than either reaching into process-wide state.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_ALGORITHM, LB_NAME_PREFIX, STORE_KEY_PREFIX};

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

/// Desired parameters for one managed load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbConfig {
    /// Application the load balancer fronts
    pub app: String,
    /// Deployment-scoped salt; keeps derived names stable across runs for
    /// the same app while separating deployments that share a cloud
    pub deployment_id: String,
    /// Listener and backend port
    pub port: u16,
    /// Subnet for the VIP and backend members; when empty it is resolved
    /// from the first backend member's address
    #[serde(default)]
    pub subnet: String,
    /// Pool balancing algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Network to allocate a floating IP from; absence means no floating IP
    /// is managed
    #[serde(default)]
    pub fip_net: Option<String>,
    /// Whether this component owns security-group lifecycle, vs. assuming
    /// the port is already open
    #[serde(default)]
    pub manage_secgrps: bool,
}

impl LbConfig {
    /// The derived deterministic load balancer name
    pub fn lb_name(&self) -> String {
        format!("{}-{}-{}", LB_NAME_PREFIX, self.deployment_id, self.app)
    }

    /// The state store key scoped to this load balancer
    pub fn store_key(&self) -> String {
        format!("{}.{}", STORE_KEY_PREFIX, self.lb_name())
    }
}

/// Credentials injected into each `openstack` CLI invocation
///
/// These become the `OS_*` environment block; nothing is written to global
/// process state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudCredentials {
    /// Keystone authentication endpoint
    pub auth_url: String,
    /// Region name
    pub region: String,
    /// User name
    pub username: String,
    /// Password
    pub password: String,
    /// User domain
    pub user_domain_name: String,
    /// Project domain
    pub project_domain_name: String,
    /// Project name
    pub project_name: String,
    /// Identity API version, omitted when the endpoint implies it
    #[serde(default)]
    pub identity_api_version: Option<String>,
    /// Path to a CA certificate bundle for the endpoint, if TLS is
    /// terminated with a private CA
    #[serde(default)]
    pub cacert: Option<String>,
}

impl CloudCredentials {
    /// Load credentials from the standard `OS_*` environment variables
    ///
    /// Returns `None` when any required variable is absent.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            auth_url: env::var("OS_AUTH_URL").ok()?,
            region: env::var("OS_REGION_NAME").ok()?,
            username: env::var("OS_USERNAME").ok()?,
            password: env::var("OS_PASSWORD").ok()?,
            user_domain_name: env::var("OS_USER_DOMAIN_NAME").ok()?,
            project_domain_name: env::var("OS_PROJECT_DOMAIN_NAME").ok()?,
            project_name: env::var("OS_PROJECT_NAME").ok()?,
            identity_api_version: env::var("OS_IDENTITY_API_VERSION").ok(),
            cacert: env::var("OS_CACERT").ok(),
        })
    }

    /// The environment block passed to each CLI invocation
    pub fn env_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::from([
            ("OS_AUTH_URL".to_string(), self.auth_url.clone()),
            ("OS_REGION_NAME".to_string(), self.region.clone()),
            ("OS_USERNAME".to_string(), self.username.clone()),
            ("OS_PASSWORD".to_string(), self.password.clone()),
            (
                "OS_USER_DOMAIN_NAME".to_string(),
                self.user_domain_name.clone(),
            ),
            (
                "OS_PROJECT_DOMAIN_NAME".to_string(),
                self.project_domain_name.clone(),
            ),
            ("OS_PROJECT_NAME".to_string(), self.project_name.clone()),
        ]);
        if let Some(version) = &self.identity_api_version {
            vars.insert("OS_IDENTITY_API_VERSION".to_string(), version.clone());
        }
        if let Some(cacert) = &self.cacert {
            vars.insert("OS_CACERT".to_string(), cacert.clone());
        }
        vars
    }
}
