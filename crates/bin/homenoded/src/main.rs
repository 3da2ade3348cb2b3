//! # homenoded — homenode daemon
//!
//! Composition root that wires the drivers, timer, and API transport
//! together and runs one node.
//!
//! ## Responsibilities
//! - Load daemon settings (`homenode.toml` + env vars)
//! - Initialize tracing (stderr or log file)
//! - Parse and validate the JSON node config
//! - Construct the driver factory, timer, and outbound API client
//! - Assemble the node, start the scheduler, and serve the API
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no automation logic belongs here.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use homenode_adapter_api_tcp::{TcpApiClient, serve};
use homenode_adapter_virtual::VirtualDriverFactory;
use homenode_app::node::{Node, NodeContext};
use homenode_app::timer::SoftwareTimer;
use homenode_domain::config::NodeConfig;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Config::load()?;
    let log_path = init_tracing(&settings)?;

    // Node config
    let raw = std::fs::read_to_string(&settings.node.config_path)?;
    let node_config = NodeConfig::parse(&serde_json::from_str(&raw)?)?;
    info!(
        id = %node_config.id,
        devices = node_config.devices.len(),
        sensors = node_config.sensors.len(),
        "node config loaded"
    );

    // Runtime
    let timer = Arc::new(SoftwareTimer::new());
    let context = NodeContext {
        timer: Arc::clone(&timer),
        api: Arc::new(TcpApiClient::new(settings.server.port)),
    };
    let node = Node::build(node_config, &VirtualDriverFactory::new(), context, log_path)?;

    tokio::spawn(async move { timer.run().await });
    node.start().await;

    // API
    let bind_addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "homenoded listening");

    tokio::select! {
        result = serve(listener, node) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}

/// Install the global subscriber. Returns the log file path (if any) so
/// the node can truncate it on `clear_log`.
fn init_tracing(settings: &Config) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(&settings.logging.filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &settings.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
            Ok(Some(PathBuf::from(path)))
        }
        None => {
            builder.with_writer(std::io::stderr).init();
            Ok(None)
        }
    }
}
