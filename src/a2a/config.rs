//! Configuration types for the orchestrator service and its child agents.
//!
//! All values are plain settings; file-based configuration is YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Orchestration timeouts
// ---------------------------------------------------------------------------

/// Deadlines governing one orchestration run. All values in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-call deadline for a single child agent.
    #[serde(default = "default_child_timeout")]
    pub child_timeout: f64,
    /// Deadline for the whole run (planning, calls and aggregation).
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout: f64,
    /// Per-agent deadline used by the health sweep.
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout: f64,
    /// Deadline for fetching one agent card during discovery.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout: f64,
}

fn default_child_timeout() -> f64 { 30.0 }
fn default_overall_timeout() -> f64 { 90.0 }
fn default_health_check_timeout() -> f64 { 5.0 }
fn default_discovery_timeout() -> f64 { 5.0 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            child_timeout: default_child_timeout(),
            overall_timeout: default_overall_timeout(),
            health_check_timeout: default_health_check_timeout(),
            discovery_timeout: default_discovery_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn child_timeout(&self) -> Duration {
        secs(self.child_timeout)
    }

    pub fn overall_timeout(&self) -> Duration {
        secs(self.overall_timeout)
    }

    pub fn health_check_timeout(&self) -> Duration {
        secs(self.health_check_timeout)
    }

    pub fn discovery_timeout(&self) -> Duration {
        secs(self.discovery_timeout)
    }

    pub fn with_child_timeout(mut self, seconds: f64) -> Self {
        self.child_timeout = seconds;
        self
    }

    pub fn with_overall_timeout(mut self, seconds: f64) -> Self {
        self.overall_timeout = seconds;
        self
    }

    pub fn with_health_check_timeout(mut self, seconds: f64) -> Self {
        self.health_check_timeout = seconds;
        self
    }
}

/// Longest deadline any setting resolves to; `.inf` and huge values saturate here.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Zero, negative and NaN settings collapse to zero.
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).map_or(MAX_TIMEOUT, |d| d.min(MAX_TIMEOUT))
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Local listener and registry location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the registry source listing child-agent URLs.
    #[serde(default)]
    pub registry: Option<PathBuf>,
}

fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 40004 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            registry: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL advertised on this service's agent card.
    pub fn public_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Whole-service config
// ---------------------------------------------------------------------------

/// Everything the orchestrator binary needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        Ok(Self::from_yaml(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 40004);
        assert_eq!(cfg.orchestrator.child_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.orchestrator.overall_timeout(), Duration::from_secs(90));
        assert_eq!(cfg.orchestrator.health_check_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg = AppConfig::from_yaml(
            "server:\n  port: 9000\n  registry: agents.json\norchestrator:\n  child_timeout: 1.5\n",
        )
        .unwrap();
        assert_eq!(cfg.server.host, "localhost");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.registry, Some(PathBuf::from("agents.json")));
        assert_eq!(cfg.orchestrator.child_timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.orchestrator.overall_timeout, 90.0);
    }

    #[test]
    fn test_negative_timeout_is_zero() {
        let cfg = OrchestratorConfig::default().with_child_timeout(-1.0);
        assert_eq!(cfg.child_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_unbounded_timeouts_saturate() {
        let cfg = AppConfig::from_yaml("orchestrator:\n  overall_timeout: .inf\n  child_timeout: 1.0e300\n")
            .unwrap();
        assert_eq!(cfg.orchestrator.overall_timeout(), MAX_TIMEOUT);
        assert_eq!(cfg.orchestrator.child_timeout(), MAX_TIMEOUT);

        let nan = OrchestratorConfig::default().with_health_check_timeout(f64::NAN);
        assert_eq!(nan.health_check_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_public_url() {
        let server = ServerConfig::default();
        assert_eq!(server.public_url(), "http://localhost:40004/");
        assert_eq!(server.bind_addr(), "localhost:40004");
    }
}
