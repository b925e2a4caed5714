//! HTTP surface of an A2A agent service.
//!
//! # Endpoints
//!
//! - `POST /`                        - JSON-RPC `tasks/send` and `tasks/get`
//! - `GET  /.well-known/agent.json`  - Agent card
//! - `GET  /health`                  - Liveness probe

pub mod routes;

pub use routes::{app_router, AppState};
