//! ==============================================================================
//! main.rs - tagscan node entry point
//! ==============================================================================
//!
//! purpose:
//!     one binary for both roles. the hub owns the round and the kiosk api,
//!     a satellite owns one tag reader and one light.
//!
//! responsibilities:
//!     - parse command line overrides
//!     - load host.toml (or defaults)
//!     - initialise tracing
//!     - hand over to runtime.rs until ctrl-c
//!
//! usage:
//!     tagscan-host --config config/host.toml
//!     tagscan-host --config config/satellite.toml --role satellite --node-id sat2
//!
//! ==============================================================================

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tagscan::config::{HostConfig, Role};
use tagscan::runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tagscan-host", version, about = "Hub / satellite node of the tag-scan game")]
struct Opts {
    /// path to host.toml; without it config/host.toml is tried, then defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// override [cluster].role
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// override [cluster].node_id (satellites)
    #[arg(long)]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    // step 1: load configuration
    let mut config = match &opts.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::load_or_default(),
    };
    if let Some(role) = opts.role {
        config.cluster.role = role;
    }
    if let Some(node_id) = opts.node_id {
        config.cluster.node_id = node_id;
    }
    config.validate()?;

    // step 2: logging; RUST_LOG wins over [logging].level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    tracing::info!("tagscan host v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    // step 3: run until ctrl-c
    runtime::run(config).await
}
