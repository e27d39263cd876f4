//! openstack-lb - OpenStack load balancer reconciliation CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use openstack_lb::cloud::{Member, MemberSet, OpenStackCli};
use openstack_lb::config::{CloudCredentials, LbConfig};
use openstack_lb::lb::{default_subnet, LoadBalancer};
use openstack_lb::store::{JsonFileStore, StateStore};

/// openstack-lb - reconcile one load balancer with its backend members
#[derive(Parser, Debug)]
#[command(name = "openstack-lb", version, about, long_about = None)]
struct Cli {
    /// Path to the load balancer YAML configuration file
    #[arg(short = 'f', long = "config")]
    config_file: PathBuf,

    /// Path to the JSON state store
    #[arg(long, env = "OPENSTACK_LB_STORE", default_value = "lb-state.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the load balancer if needed, recovering any partially
    /// created resources, and print the resolved VIP address
    Ensure,

    /// Reconcile backend pool membership to exactly the given members
    UpdateMembers {
        /// Desired member, as ADDR:PORT; repeatable
        #[arg(long = "member", value_name = "ADDR:PORT")]
        members: Vec<String>,
    },

    /// Print the persisted state for the configured load balancer
    Show,
}

fn parse_member(raw: &str) -> anyhow::Result<Member> {
    let (address, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid member '{}': expected ADDR:PORT", raw))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid member port in '{}'", raw))?;
    Ok(Member::new(address, port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let raw = std::fs::read_to_string(&cli.config_file)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", cli.config_file.display(), e))?;
    let mut config: LbConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid load balancer config: {}", e))?;

    let creds = CloudCredentials::from_env().ok_or_else(|| {
        anyhow::anyhow!("missing OpenStack credentials; set the OS_* environment variables")
    })?;
    let client = Arc::new(OpenStackCli::new(creds));
    let store = Arc::new(JsonFileStore::new(&cli.store));

    match cli.command {
        Commands::Ensure => {
            if config.subnet.is_empty() {
                anyhow::bail!("config must set a subnet to create a load balancer");
            }
            let lb = LoadBalancer::get_or_create(client, store, &config).await?;
            match &lb.address {
                Some(address) => println!("{}", address),
                None => println!("(no address resolved)"),
            }
            if let Some(fip) = &lb.fip {
                println!("{}", fip);
            }
        }
        Commands::UpdateMembers { members } => {
            let desired: MemberSet = members
                .iter()
                .map(|raw| parse_member(raw))
                .collect::<anyhow::Result<_>>()?;

            // an unset subnet is resolved from the first member's address
            if config.subnet.is_empty() {
                let ordered: Vec<Member> = desired.iter().cloned().collect();
                config.subnet = default_subnet(client.as_ref(), &ordered).await?;
            }

            let mut lb = LoadBalancer::get_or_create(client, store, &config).await?;
            lb.update_members(&desired).await?;
            for member in &lb.members {
                println!("{}", member);
            }
        }
        Commands::Show => {
            let key = config.store_key();
            match store.get(&key)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no record for {}", config.lb_name()),
            }
        }
    }

    Ok(())
}
