//! Cluster inspection tool.
//!
//! Runs one discovery round against the configured seeds, prints the
//! membership and the endpoint the node preference would route to.
//!
//! # Usage
//!
//! ```bash
//! esdb-gossip "esdb+discover://nodeA:2113,nodeB:2113?tls=false"
//! esdb-gossip --config esdb.toml --format json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use esdb_client::config::{ClientConfig, DEFAULT_CONFIG_FILE};
use esdb_client::logging::{self, OutputFormat, TracingConfig};
use esdb_client::selection::select_node;
use esdb_client::{connection_string, Client, MemberRole};

#[derive(Parser)]
#[command(name = "esdb-gossip")]
#[command(about = "Discover cluster members and show the selected node", long_about = None)]
struct Cli {
    /// Connection string; overrides the configuration file
    connection_string: Option<String>,

    /// Configuration file (TOML format)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "pretty")]
    format: OutputFormat,
}

fn role_label(role: MemberRole) -> &'static str {
    match role {
        MemberRole::Leader => "leader",
        MemberRole::Follower => "follower",
        MemberRole::ReadOnlyReplica => "read-only-replica",
        MemberRole::Unknown => "unknown",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ClientConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let tracing_config = TracingConfig::from_client_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    let settings = match &cli.connection_string {
        Some(descriptor) => connection_string::parse(descriptor)?,
        None => config.into_settings()?,
    };
    let preference = settings.node_preference();
    let client = Client::new(settings)?;

    let members = client
        .cluster_members()
        .await
        .context("cluster discovery failed")?;

    println!("{:<40} {:<18} {}", "ENDPOINT", "ROLE", "ALIVE");
    for member in &members {
        println!(
            "{:<40} {:<18} {}",
            member.endpoint.to_string(),
            role_label(member.role),
            member.is_alive
        );
    }

    let selected = select_node(&members, preference)
        .with_context(|| format!("no member satisfies node preference '{preference}'"))?;
    println!();
    println!("selected ({preference}): {}", selected.endpoint);

    client.close().await;
    Ok(())
}
