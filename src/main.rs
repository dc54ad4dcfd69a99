//! troupe server binary.
//!
//! Wires configuration, the standard roster, and the registry together,
//! then serves the WebSocket transport until a shutdown signal drains the
//! in-flight workflows.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use troupe::agent::{HttpTextGenerator, InMemoryStore, Roster};
use troupe::config::{ConfigurationLoader, EnvironmentLoader};
use troupe::registry::WorkflowRegistry;
use troupe::routing::{RoutePlan, RoutingPolicy};
use troupe::server::TransportServer;

const EVICTION_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "troupe", about = "Multi-agent workflow coordination server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen host override.
    #[arg(long)]
    host: Option<String>,

    /// Listen port override.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local development picks up provider credentials from `.env`.
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let loader = ConfigurationLoader::new(args.config.as_deref())?;
    let config = loader.config;
    if let Some(path) = &loader.config_path {
        tracing::info!(path = %path.display(), "configuration loaded");
    }
    let env = EnvironmentLoader::new(None);

    let endpoint = env
        .generation_endpoint()
        .unwrap_or_else(|| config.generation.endpoint.clone());
    let provider = Arc::new(HttpTextGenerator::new(
        endpoint,
        config.generation.model.clone(),
        env.generation_api_key(),
    ));
    let memory = Arc::new(InMemoryStore::new());

    let roster = Arc::new(Roster::standard(provider, memory)?);
    let policy = Arc::new(RoutingPolicy::new(
        RoutePlan::standard(),
        config.workflow.budget(),
    ));
    roster.validate_plan(policy.plan())?;

    let registry = Arc::new(WorkflowRegistry::new(roster, policy, config.registry()));
    tokio::spawn(registry.clone().run_eviction(EVICTION_PERIOD));

    let host = args
        .host
        .or_else(|| env.listen_host())
        .unwrap_or_else(|| config.server.host.clone());
    let port = args.port.or_else(|| env.listen_port()).unwrap_or(config.server.port);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    tracing::info!("listening on ws://{}:{}", host, port);

    let server = TransportServer::new(registry.clone());
    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, draining workflows");
            registry.shutdown().await;
        }
    }

    Ok(())
}
