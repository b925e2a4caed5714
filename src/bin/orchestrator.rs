//! Coordinating agent service.
//!
//! Discovers child agents from a registry, then serves the A2A task
//! protocol, fanning every request out to the discovered agents.
//!
//! # Environment Variables
//!
//! - `A2A_CONFIG` - YAML config file (same as `--config`)
//! - `A2A_HOST`, `A2A_PORT`, `A2A_REGISTRY` - listener and registry overrides
//! - `A2A_CHILD_TIMEOUT`, `A2A_OVERALL_TIMEOUT`, `A2A_HEALTH_TIMEOUT` - seconds
//! - `RUST_LOG` - Tracing filter (default: "info,a2a_orchestrator=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin orchestrator -- --registry agent_registry.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use a2a_orchestrator::a2a::config::AppConfig;
use a2a_orchestrator::a2a::discovery::{AgentRegistry, DiscoveryClient};
use a2a_orchestrator::a2a::task_manager::OrchestratorTaskManager;
use a2a_orchestrator::a2a::types::{AgentCard, AgentSkill};
use a2a_orchestrator::orchestrator::{BroadcastPolicy, Orchestrator};
use a2a_orchestrator::server::{app_router, AppState};

/// A2A orchestrator - fan requests out to child agents and aggregate their answers
#[derive(Parser, Debug)]
#[command(name = "orchestrator", version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "A2A_CONFIG")]
    config: Option<PathBuf>,

    /// Listener host
    #[arg(long, env = "A2A_HOST")]
    host: Option<String>,

    /// Listener port
    #[arg(long, env = "A2A_PORT")]
    port: Option<u16>,

    /// Registry file listing child-agent URLs
    #[arg(long, env = "A2A_REGISTRY")]
    registry: Option<PathBuf>,

    /// Per-call child timeout in seconds
    #[arg(long, env = "A2A_CHILD_TIMEOUT")]
    child_timeout: Option<f64>,

    /// Overall orchestration timeout in seconds
    #[arg(long, env = "A2A_OVERALL_TIMEOUT")]
    overall_timeout: Option<f64>,

    /// Health-check timeout in seconds
    #[arg(long, env = "A2A_HEALTH_TIMEOUT")]
    health_timeout: Option<f64>,
}

impl Args {
    /// File values first, flags and environment on top.
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.registry.is_some() {
            config.server.registry = self.registry;
        }
        if let Some(t) = self.child_timeout {
            config.orchestrator.child_timeout = t;
        }
        if let Some(t) = self.overall_timeout {
            config.orchestrator.overall_timeout = t;
        }
        if let Some(t) = self.health_timeout {
            config.orchestrator.health_check_timeout = t;
        }
        Ok(config)
    }
}

fn orchestrator_card(url: String) -> AgentCard {
    AgentCard::new("Orchestrator Agent", url)
        .with_description("Coordinates child agents and aggregates their answers into one decision")
        .with_skill(
            AgentSkill::new("orchestrate", "Orchestrate child agents")
                .with_description("Delegates a request to the registered agents and combines their replies")
                .with_tags(["orchestration", "aggregation"]),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,a2a_orchestrator=debug".into()),
        )
        .init();

    let config = Args::parse().into_config()?;

    let discovery = DiscoveryClient::new(
        config.server.registry.clone(),
        config.orchestrator.discovery_timeout(),
    );
    let registry = AgentRegistry::from_cards(discovery.list_agent_cards().await);
    if registry.is_empty() {
        tracing::warn!("No child agents discovered; requests will be answered as failed");
    } else {
        tracing::info!("Discovered agents: {}", registry.names().join(", "));
    }

    let orchestrator = Orchestrator::from_registry(
        &registry,
        Arc::new(BroadcastPolicy),
        config.orchestrator.clone(),
    );
    let task_manager = OrchestratorTaskManager::new(Arc::new(orchestrator));
    let state = AppState::new(orchestrator_card(config.server.public_url()), Arc::new(task_manager));
    let app = app_router(state);

    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Orchestrator starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  POST /                       - tasks/send, tasks/get");
    tracing::info!("  GET  /.well-known/agent.json - agent card");
    tracing::info!("  GET  /health                 - liveness probe");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
