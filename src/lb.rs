//! Load balancer reconciler
//!
//! [`LoadBalancer`] drives one VIP + listener + pool + optional security
//! group + optional floating IP through creation, recovery, and ongoing
//! membership reconciliation. Every sub-resource is discovered by name
//! before being created, so a run that died partway through is recovered by
//! the next run converging on the same state through discovery instead of
//! creation.
//!
//! Concurrent runs against the same name are not coordinated here; callers
//! must serialize per name. Duplicate-name detection in [`find_unique`] is
//! the only defense against a lost race, and it fails loudly.

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use tracing::{debug, error, info};

use crate::cloud::{LbClient, Member, MemberSet, ResourceRecord};
use crate::config::LbConfig;
use crate::poll::{wait_not_pending, PollConfig};
use crate::secgroup::any_rule_matches;
use crate::store::{LbRecord, StateStore};
use crate::{Error, Result, DEFAULT_SECGRP_NAME};

/// Return the unique record with the given name, `None` if absent.
///
/// More than one match is a fatal ambiguity: duplicate names indicate
/// corrupted or concurrently-modified cloud state that must not be guessed
/// at.
pub fn find_unique<'a>(
    kind: &str,
    name: &str,
    records: &'a [ResourceRecord],
) -> Result<Option<&'a ResourceRecord>> {
    let mut matches = records.iter().filter(|record| record.name == name);
    match (matches.next(), matches.next()) {
        (None, _) => Ok(None),
        (Some(record), None) => Ok(Some(record)),
        (Some(_), Some(_)) => {
            error!(kind = %kind, name = %name, "multiple resources found with the same name");
            Err(Error::ambiguous(kind, name))
        }
    }
}

/// Pick the subnet whose CIDR contains the first member's address.
///
/// Used when no subnet is configured explicitly. Errors when the member
/// list is empty or no known subnet contains the address.
pub async fn default_subnet(client: &dyn LbClient, members: &[Member]) -> Result<String> {
    let address = members.first().map(|m| m.address.clone()).unwrap_or_default();
    let addr: IpAddr = address.parse().map_err(|_| Error::NoMatchingSubnet {
        address: address.clone(),
    })?;

    let subnets = client
        .list_subnets()
        .await
        .map_err(|e| Error::cloud("listing subnets", e))?;

    for subnet in &subnets {
        if let Ok(net) = subnet.cidr.parse::<IpNet>() {
            if net.contains(&addr) {
                return Ok(subnet.name.clone());
            }
        }
    }
    Err(Error::NoMatchingSubnet { address })
}

/// One managed load balancer and its reconciliation state
///
/// Constructed fresh per control-loop invocation; hydrated from the state
/// store when a prior run completed creation. [`LoadBalancer::create`] is
/// idempotent and safe to call when partially or fully created;
/// [`LoadBalancer::update_members`] is called repeatedly as the desired
/// backend set changes.
pub struct LoadBalancer {
    client: Arc<dyn LbClient>,
    store: Arc<dyn StateStore>,
    poll: PollConfig,

    /// Derived deterministic name, shared by the listener, pool, and
    /// managed security group
    pub name: String,
    key: String,

    port: u16,
    subnet: String,
    algorithm: String,
    fip_net: Option<String>,
    manage_secgrps: bool,

    /// Managed security group id; stays `None` when groups are unmanaged
    pub sg_id: Option<String>,
    /// Floating IP address, once resolved
    pub fip: Option<String>,
    /// VIP address, once resolved
    pub address: Option<String>,
    /// Applied backend membership as last observed or applied, never a
    /// desired-but-unapplied state
    pub members: MemberSet,
}

impl LoadBalancer {
    /// Create an unresolved load balancer handle from desired parameters
    pub fn new(
        client: Arc<dyn LbClient>,
        store: Arc<dyn StateStore>,
        config: &LbConfig,
    ) -> Self {
        Self {
            client,
            store,
            poll: PollConfig::default(),
            name: config.lb_name(),
            key: config.store_key(),
            port: config.port,
            subnet: config.subnet.clone(),
            algorithm: config.algorithm.clone(),
            fip_net: config.fip_net.clone(),
            manage_secgrps: config.manage_secgrps,
            sg_id: None,
            fip: None,
            address: None,
            members: MemberSet::new(),
        }
    }

    /// Override the polling bounds
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Whether creation has completed and the VIP address is known
    pub fn is_created(&self) -> bool {
        self.address.is_some()
    }

    /// Fetch the persisted record for this name, hydrating identity fields
    /// verbatim; run [`Self::create`] when no record exists.
    pub async fn get_or_create(
        client: Arc<dyn LbClient>,
        store: Arc<dyn StateStore>,
        config: &LbConfig,
    ) -> Result<Self> {
        let mut lb = Self::new(client, store, config);
        match lb.store.get(&lb.key)? {
            Some(record) => {
                debug!(name = %lb.name, "hydrating load balancer from stored record");
                lb.hydrate(record);
            }
            None => lb.create().await?,
        }
        Ok(lb)
    }

    fn hydrate(&mut self, record: LbRecord) {
        self.members = record.member_set();
        self.sg_id = record.sg_id;
        self.fip = record.fip;
        self.address = record.address;
    }

    fn persist(&self) -> Result<()> {
        let record = LbRecord::new(
            self.sg_id.clone(),
            self.fip.clone(),
            self.address.clone(),
            &self.members,
        );
        self.store.set(&self.key, &record)?;
        Ok(())
    }

    /// Poll the load balancer until it leaves the pending set
    async fn wait_lb_active(&self) -> Result<ResourceRecord> {
        let client = Arc::clone(&self.client);
        let name = self.name.clone();
        wait_not_pending(
            &self.poll,
            &format!("load balancer {}", self.name),
            move || {
                let client = Arc::clone(&client);
                let name = name.clone();
                async move { client.show_loadbalancer(&name).await }
            },
        )
        .await
    }

    /// Poll the pool until it leaves the pending set
    async fn wait_pool_active(&self) -> Result<ResourceRecord> {
        let client = Arc::clone(&self.client);
        let name = self.name.clone();
        wait_not_pending(&self.poll, &format!("pool {}", self.name), move || {
            let client = Arc::clone(&client);
            let name = name.clone();
            async move { client.show_pool(&name).await }
        })
        .await
    }

    /// Discover or create every sub-resource, in dependency order.
    ///
    /// Exactly one of the fresh-creation and recovery paths runs per call,
    /// determined solely by whether a load balancer with the target name
    /// already exists in the cloud's listing. Identity fields are persisted
    /// once, at the end, so a crash mid-sequence leaves no stale record.
    pub async fn create(&mut self) -> Result<()> {
        info!(name = %self.name, "reconciling load balancer");

        // VIP
        let lbs = self
            .client
            .list_loadbalancers()
            .await
            .map_err(|e| Error::cloud("listing load balancers", e))?;
        if find_unique("load balancers", &self.name, &lbs)?.is_none() {
            info!(name = %self.name, subnet = %self.subnet, "creating load balancer");
            self.client
                .create_loadbalancer(&self.name, &self.subnet)
                .await
                .map_err(|e| Error::cloud("creating load balancer", e))?;
        }
        let lb = self.wait_lb_active().await?;
        let address = lb.vip_address.clone().ok_or_else(|| {
            Error::cloud(
                "resolving VIP",
                crate::cloud::CloudError::MissingField {
                    resource: "load balancer".to_string(),
                    field: "vip_address".to_string(),
                },
            )
        })?;
        let port_id = lb.vip_port_id.clone().ok_or_else(|| {
            Error::cloud(
                "resolving VIP",
                crate::cloud::CloudError::MissingField {
                    resource: "load balancer".to_string(),
                    field: "vip_port_id".to_string(),
                },
            )
        })?;
        self.address = Some(address.clone());

        // security group
        let sg_id = if self.manage_secgrps {
            let found = self
                .client
                .find_secgrp(&self.name)
                .await
                .map_err(|e| Error::cloud("finding security group", e))?;
            let sg_id = match found {
                Some(sg_id) => sg_id,
                None => {
                    info!(name = %self.name, "creating security group");
                    self.client
                        .create_secgrp(&self.name)
                        .await
                        .map_err(|e| Error::cloud("creating security group", e))?
                }
            };
            self.sg_id = Some(sg_id.clone());
            sg_id
        } else {
            let found = self
                .client
                .find_secgrp(DEFAULT_SECGRP_NAME)
                .await
                .map_err(|e| Error::cloud("finding default security group", e))?;
            match found {
                Some(sg_id) => sg_id,
                None => {
                    // deterministic configuration error, not retryable:
                    // the operator must pre-provision a group
                    error!("Unable to find default security group");
                    return Err(Error::MissingSecurityGroup);
                }
            }
        };

        // ingress rule for the VIP
        let rules = self
            .client
            .list_sg_rules(&sg_id)
            .await
            .map_err(|e| Error::cloud("listing security group rules", e))?;
        if !any_rule_matches(&rules, &address, self.port) {
            info!(address = %address, port = self.port, "creating ingress rule for VIP");
            self.client
                .create_sg_rule(&sg_id, &address, self.port)
                .await
                .map_err(|e| Error::cloud("creating security group rule", e))?;
        }

        // attach the managed group to the VIP port when security is enforced
        if self.manage_secgrps {
            let sec_enabled = self
                .client
                .get_port_sec_enabled(&port_id)
                .await
                .map_err(|e| Error::cloud("checking port security", e))?;
            if sec_enabled {
                self.client
                    .set_port_secgrp(&port_id, &sg_id)
                    .await
                    .map_err(|e| Error::cloud("attaching security group to VIP port", e))?;
            }
        }

        // listener
        let listeners = self
            .client
            .list_listeners()
            .await
            .map_err(|e| Error::cloud("listing listeners", e))?;
        if find_unique("listeners", &self.name, &listeners)?.is_none() {
            info!(name = %self.name, port = self.port, "creating listener");
            self.client
                .create_listener(&self.name, &self.name, self.port)
                .await
                .map_err(|e| Error::cloud("creating listener", e))?;
        }
        // listener creation flips the load balancer back into pending
        self.wait_lb_active().await?;

        // pool
        let pools = self
            .client
            .list_pools()
            .await
            .map_err(|e| Error::cloud("listing pools", e))?;
        if find_unique("pools", &self.name, &pools)?.is_none() {
            info!(name = %self.name, algorithm = %self.algorithm, "creating pool");
            self.client
                .create_pool(&self.name, &self.name, &self.algorithm)
                .await
                .map_err(|e| Error::cloud("creating pool", e))?;
        }
        self.wait_pool_active().await?;

        // floating IP, only when a network was given
        if let Some(net) = self.fip_net.clone() {
            let fips = self
                .client
                .list_fips()
                .await
                .map_err(|e| Error::cloud("listing floating IPs", e))?;
            let existing = fips
                .iter()
                .find(|fip| fip.fixed_address.as_deref() == Some(address.as_str()));
            self.fip = Some(match existing {
                Some(fip) => {
                    debug!(fip = %fip.floating_address, "reusing floating IP mapped to VIP");
                    fip.floating_address.clone()
                }
                None => {
                    info!(net = %net, "allocating floating IP");
                    self.client
                        .create_fip(&net, &address, &port_id)
                        .await
                        .map_err(|e| Error::cloud("creating floating IP", e))?
                }
            });
        }

        // seed membership from current cloud state; create() does not
        // enforce a desired set, update_members() does that afterward
        let members = self
            .client
            .list_members(&self.name)
            .await
            .map_err(|e| Error::cloud("listing members", e))?;
        self.members = members.into_iter().collect();

        self.persist()?;
        info!(name = %self.name, address = %address, "load balancer reconciled");
        Ok(())
    }

    /// Reconcile backend membership to exactly `desired`.
    ///
    /// Issues one cloud mutation per changed member, removals before
    /// additions. The in-memory set records each mutation as it is applied,
    /// so a member never appears unless its create call succeeded and is
    /// only dropped after its delete call succeeded. A no-op diff issues no
    /// cloud calls at all.
    pub async fn update_members(&mut self, desired: &MemberSet) -> Result<()> {
        let to_remove: Vec<Member> = self.members.difference(desired).cloned().collect();
        let to_add: Vec<Member> = desired.difference(&self.members).cloned().collect();
        if to_remove.is_empty() && to_add.is_empty() {
            debug!(name = %self.name, "membership already in sync");
            return Ok(());
        }

        // the backend rejects membership changes while the pool is pending
        self.wait_pool_active().await?;

        for member in to_remove {
            info!(name = %self.name, member = %member, "removing member");
            self.client
                .delete_member(&self.name, &member)
                .await
                .map_err(|e| Error::cloud(format!("removing member {}", member), e))?;
            self.members.remove(&member);
        }
        for member in to_add {
            info!(name = %self.name, member = %member, "adding member");
            self.client
                .create_member(&self.name, &member, &self.subnet)
                .await
                .map_err(|e| Error::cloud(format!("adding member {}", member), e))?;
            self.members.insert(member);
        }

        if self.is_created() {
            self.persist()?;
        }
        Ok(())
    }
}
