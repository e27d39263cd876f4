//! Octavia CLI adapter
//!
//! Implements [`LbClient`] by shelling out to the `openstack` CLI with
//! `-f json` output and the credential environment block. This is the only
//! piece of the crate that knows command syntax; everything above it speaks
//! the capability interface.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::CloudCredentials;

use super::{CloudError, FloatingIp, LbClient, Member, ResourceRecord, SgRule, SubnetRecord};

/// CLI-backed implementation of the cloud capability interface
#[derive(Debug)]
pub struct OpenStackCli {
    creds: CloudCredentials,
}

/// Security group row in `security group list -f json` output
#[derive(Debug, Deserialize)]
struct SecGroupRow {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
}

/// Subset of `port show -f json` output
#[derive(Debug, Deserialize)]
struct PortDetail {
    #[serde(default)]
    port_security_enabled: bool,
}

/// Member row in `loadbalancer member list -f json` output
#[derive(Debug, Deserialize)]
struct MemberRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    protocol_port: u16,
}

/// Subset of `floating ip create -f json` output
#[derive(Debug, Deserialize)]
struct FipDetail {
    #[serde(default)]
    floating_ip_address: String,
}

impl OpenStackCli {
    /// Create an adapter that authenticates with the given credentials
    pub fn new(creds: CloudCredentials) -> Self {
        Self { creds }
    }

    /// Run `openstack <args>` and return stdout on success
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, CloudError> {
        let command = format!("openstack {}", args.join(" "));
        debug!(command = %command, "running openstack cli");

        let output = Command::new("openstack")
            .args(args)
            .envs(self.creds.env_vars())
            .output()
            .await
            .map_err(|source| CloudError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CloudError::CommandFailed { command, stderr });
        }

        Ok(output.stdout)
    }

    /// Run a command and parse its `-f json` output
    async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, CloudError> {
        let stdout = self.run(args).await?;
        serde_json::from_slice(&stdout).map_err(|e| CloudError::Parse {
            command: format!("openstack {}", args.join(" ")),
            message: e.to_string(),
        })
    }

    /// Resolve a member's cloud id from its address/port identity
    async fn find_member_id(
        &self,
        pool: &str,
        member: &Member,
    ) -> Result<Option<String>, CloudError> {
        let rows: Vec<MemberRow> = self
            .run_json(&["loadbalancer", "member", "list", pool, "-f", "json"])
            .await?;
        Ok(rows
            .into_iter()
            .find(|row| row.address == member.address && row.protocol_port == member.port)
            .map(|row| row.id))
    }
}

#[async_trait]
impl LbClient for OpenStackCli {
    async fn list_loadbalancers(&self) -> Result<Vec<ResourceRecord>, CloudError> {
        self.run_json(&["loadbalancer", "list", "-f", "json"]).await
    }

    async fn create_loadbalancer(
        &self,
        name: &str,
        subnet: &str,
    ) -> Result<ResourceRecord, CloudError> {
        self.run_json(&[
            "loadbalancer",
            "create",
            "--name",
            name,
            "--vip-subnet-id",
            subnet,
            "-f",
            "json",
        ])
        .await
    }

    async fn show_loadbalancer(&self, name: &str) -> Result<ResourceRecord, CloudError> {
        self.run_json(&["loadbalancer", "show", name, "-f", "json"])
            .await
    }

    async fn find_secgrp(&self, name: &str) -> Result<Option<String>, CloudError> {
        let rows: Vec<SecGroupRow> = self
            .run_json(&["security", "group", "list", "-f", "json"])
            .await?;
        Ok(rows.into_iter().find(|row| row.name == name).map(|row| row.id))
    }

    async fn create_secgrp(&self, name: &str) -> Result<String, CloudError> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(default)]
            id: String,
        }
        let created: Created = self
            .run_json(&["security", "group", "create", name, "-f", "json"])
            .await?;
        Ok(created.id)
    }

    async fn list_sg_rules(&self, sg_id: &str) -> Result<Vec<SgRule>, CloudError> {
        self.run_json(&[
            "security", "group", "rule", "list", sg_id, "--ingress", "-f", "json",
        ])
        .await
    }

    async fn create_sg_rule(
        &self,
        sg_id: &str,
        address: &str,
        port: u16,
    ) -> Result<(), CloudError> {
        let port = port.to_string();
        let remote = format!("{}/32", address);
        self.run(&[
            "security",
            "group",
            "rule",
            "create",
            "--ingress",
            "--protocol",
            "tcp",
            "--dst-port",
            &port,
            "--remote-ip",
            &remote,
            sg_id,
        ])
        .await?;
        Ok(())
    }

    async fn get_port_sec_enabled(&self, port_id: &str) -> Result<bool, CloudError> {
        let detail: PortDetail = self
            .run_json(&["port", "show", port_id, "-f", "json"])
            .await?;
        Ok(detail.port_security_enabled)
    }

    async fn set_port_secgrp(&self, port_id: &str, sg_id: &str) -> Result<(), CloudError> {
        self.run(&["port", "set", "--security-group", sg_id, port_id])
            .await?;
        Ok(())
    }

    async fn list_listeners(&self) -> Result<Vec<ResourceRecord>, CloudError> {
        self.run_json(&["loadbalancer", "listener", "list", "-f", "json"])
            .await
    }

    async fn create_listener(
        &self,
        name: &str,
        lb_name: &str,
        port: u16,
    ) -> Result<ResourceRecord, CloudError> {
        let port = port.to_string();
        self.run_json(&[
            "loadbalancer",
            "listener",
            "create",
            "--name",
            name,
            "--protocol",
            "TCP",
            "--protocol-port",
            &port,
            lb_name,
            "-f",
            "json",
        ])
        .await
    }

    async fn list_pools(&self) -> Result<Vec<ResourceRecord>, CloudError> {
        self.run_json(&["loadbalancer", "pool", "list", "-f", "json"])
            .await
    }

    async fn create_pool(
        &self,
        name: &str,
        listener: &str,
        algorithm: &str,
    ) -> Result<ResourceRecord, CloudError> {
        self.run_json(&[
            "loadbalancer",
            "pool",
            "create",
            "--name",
            name,
            "--listener",
            listener,
            "--protocol",
            "TCP",
            "--lb-algorithm",
            algorithm,
            "-f",
            "json",
        ])
        .await
    }

    async fn show_pool(&self, name: &str) -> Result<ResourceRecord, CloudError> {
        self.run_json(&["loadbalancer", "pool", "show", name, "-f", "json"])
            .await
    }

    async fn list_members(&self, pool: &str) -> Result<Vec<Member>, CloudError> {
        let rows: Vec<MemberRow> = self
            .run_json(&["loadbalancer", "member", "list", pool, "-f", "json"])
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Member::new(row.address, row.protocol_port))
            .collect())
    }

    async fn create_member(
        &self,
        pool: &str,
        member: &Member,
        subnet: &str,
    ) -> Result<(), CloudError> {
        let port = member.port.to_string();
        self.run(&[
            "loadbalancer",
            "member",
            "create",
            "--address",
            &member.address,
            "--protocol-port",
            &port,
            "--subnet-id",
            subnet,
            pool,
        ])
        .await?;
        Ok(())
    }

    async fn delete_member(&self, pool: &str, member: &Member) -> Result<(), CloudError> {
        // the CLI deletes by id; a member that is already gone is a no-op
        match self.find_member_id(pool, member).await? {
            Some(id) => {
                self.run(&["loadbalancer", "member", "delete", pool, &id])
                    .await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn list_fips(&self) -> Result<Vec<FloatingIp>, CloudError> {
        self.run_json(&["floating", "ip", "list", "-f", "json"]).await
    }

    async fn create_fip(
        &self,
        net: &str,
        fixed_address: &str,
        port_id: &str,
    ) -> Result<String, CloudError> {
        let detail: FipDetail = self
            .run_json(&[
                "floating",
                "ip",
                "create",
                "--port",
                port_id,
                "--fixed-ip-address",
                fixed_address,
                net,
                "-f",
                "json",
            ])
            .await?;
        if detail.floating_ip_address.is_empty() {
            return Err(CloudError::MissingField {
                resource: "floating ip".to_string(),
                field: "floating_ip_address".to_string(),
            });
        }
        Ok(detail.floating_ip_address)
    }

    async fn list_subnets(&self) -> Result<Vec<SubnetRecord>, CloudError> {
        self.run_json(&["subnet", "list", "-f", "json"]).await
    }
}
