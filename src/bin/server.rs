use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;

use amza::config::Configuration;
use amza::ring::{RingMember, StaticRing};
use amza::AmzaService;

const DEFAULT_CONFIG_FILE: &str = "/etc/amza/config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Name this member announces to its rings.
    #[arg(short, long)]
    member: String,

    /// Other members of the main ring, repeatable.
    #[arg(short, long)]
    ring: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Configuration::parse_config_file(&args.config)?;
    config.validate()?;

    let ring = Arc::new(StaticRing::new());
    let mut members: Vec<RingMember> = args.ring.iter().map(RingMember::new).collect();
    members.push(RingMember::new(&args.member));
    ring.set_ring(b"main", members);

    let service = AmzaService::open(config, RingMember::new(&args.member), ring).await?;
    service.start_maintenance();
    info!("amza server running as {}", args.member);

    signal::ctrl_c().await?;
    info!("shutting down ...");
    service.stop_maintenance().await;

    Ok(())
}
