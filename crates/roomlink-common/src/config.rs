//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config file > defaults

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration from `file` (extension optional) and the environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init(file: &str) -> Result<&'static AppConfig, config::ConfigError> {
    let app_config = load(file)?;
    Ok(CONFIG.get_or_init(|| app_config))
}

/// Build an [`AppConfig`] without touching the global slot.
pub fn load(file: &str) -> Result<AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("agent.id", "sip-agent")?
        .set_default("agent.node_id", "sip-agent@127.0.0.1")?
        .set_default("agent.cluster", "owt-cluster")?
        .set_default("agent.internal_ip", "127.0.0.1")?
        .set_default("agent.internal_port", 0)?
        .set_default("control.host", "0.0.0.0")?
        .set_default("control.port", 8090)?
        .set_default("rpc.timeout_ms", 5_000)?
        .set_default("rpc.sip_agent_url", "http://127.0.0.1:8091")?
        .set_default("rpc.media_router_url", "http://127.0.0.1:8092")?
        .set_default("discovery.budget", 25)?
        .set_default("discovery.timeout_penalty", 4)?
        .set_default("discovery.failure_penalty", 1)?
        .set_default("discovery.retry_delay_ms", 1_000)?
        .set_default("discovery.reservation_ms", 60_000)?
        // Optional config file
        .add_source(config::File::with_name(file).required(false))
        // Environment variables (ROOMLINK_AGENT__NODE_ID, ROOMLINK_SIP__SERVER, etc.)
        .add_source(
            config::Environment::with_prefix("ROOMLINK")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub control: ControlConfig,
    pub rpc: RpcConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sip: SipConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Id of the parent agent, sent as the `agent` locality hint.
    pub id: String,
    /// This process's RPC address. Used as the join `portal` and the `node` locality hint.
    pub node_id: String,
    /// Name of the cluster coordinator that answers `schedule`.
    pub cluster: String,
    /// Address the media-routing fabric listens on for internal links.
    pub internal_ip: String,
    pub internal_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub timeout_ms: u64,
    /// Base URL of the SIP user-agent sidecar.
    pub sip_agent_url: String,
    /// Base URL of the media-routing sidecar.
    pub media_router_url: String,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry budget for controller discovery.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    pub budget: i32,
    /// Budget consumed by a failed attempt whose reason was a timeout.
    pub timeout_penalty: i32,
    /// Budget consumed by any other failed attempt.
    pub failure_penalty: i32,
    pub retry_delay_ms: u64,
    /// Reservation window passed to `schedule`.
    pub reservation_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            budget: 25,
            timeout_penalty: 4,
            failure_penalty: 1,
            retry_delay_ms: 1_000,
            reservation_ms: 60_000,
        }
    }
}

/// Optional SIP registration performed at startup instead of waiting for `init`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SipConfig {
    pub room_id: Option<String>,
    pub server: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_discovery_policy() {
        let cfg = load("does-not-exist").expect("defaults should deserialize");
        assert_eq!(cfg.discovery.budget, 25);
        assert_eq!(cfg.discovery.timeout_penalty, 4);
        assert_eq!(cfg.discovery.failure_penalty, 1);
        assert_eq!(cfg.agent.cluster, "owt-cluster");
        assert!(cfg.sip.room_id.is_none());
    }
}
