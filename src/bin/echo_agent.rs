//! Minimal child agent for local smoke runs.
//!
//! Answers every task with the text it received, so an orchestrator can be
//! exercised end to end without any model behind it.
//!
//! ```bash
//! cargo run --bin echo-agent -- --port 40002 --name Calc
//! ```

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;

use a2a_orchestrator::a2a::config::ServerConfig;
use a2a_orchestrator::a2a::task_manager::{AgentHandler, AgentTaskManager};
use a2a_orchestrator::a2a::types::{AgentCard, AgentSkill};
use a2a_orchestrator::server::{app_router, AppState};

/// Echo agent - replies with the text it receives
#[derive(Parser, Debug)]
#[command(name = "echo-agent", version, about, long_about = None)]
struct Args {
    /// Listener host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Listener port
    #[arg(long, default_value_t = 40002)]
    port: u16,

    /// Agent name advertised on the card
    #[arg(long, default_value = "Echo Agent")]
    name: String,
}

struct EchoHandler;

#[async_trait]
impl AgentHandler for EchoHandler {
    async fn invoke(&self, query: &str, session_id: &str) -> anyhow::Result<String> {
        tracing::debug!("Echoing {} chars for session {}", query.len(), session_id);
        Ok(query.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,a2a_orchestrator=debug".into()),
        )
        .init();

    let args = Args::parse();
    let server = ServerConfig {
        host: args.host,
        port: args.port,
        registry: None,
    };

    let card = AgentCard::new(args.name, server.public_url())
        .with_description("Replies with the text it receives")
        .with_skill(AgentSkill::new("echo", "Echo").with_tags(["test"]));
    let state = AppState::new(card, Arc::new(AgentTaskManager::new(EchoHandler)));

    let bind_addr = server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Echo agent starting on {}", bind_addr);

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("server failed")?;
    Ok(())
}
