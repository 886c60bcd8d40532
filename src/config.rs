//! Runtime configuration for the remote fabric.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Address this node listens on, e.g. "0.0.0.0:8070".
    pub listen_addr: Option<String>,
    /// Address advertised to peers, e.g. "ws://198.51.100.7:8070".
    pub advertise_addr: Option<String>,
    /// Seconds between one-way heartbeat frames.
    pub heartbeat_interval_secs: u64,
    /// Initial reconnect delay in milliseconds; each retry multiplies the
    /// delay by a factor in [1, 2).
    pub reconnect_initial_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            advertise_addr: None,
            heartbeat_interval_secs: 50,
            reconnect_initial_ms: 1,
        }
    }
}

impl RemoteConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let config = Config::default();
        assert_eq!(config.remote.heartbeat_interval_secs, 50);
        assert_eq!(config.remote.reconnect_initial_ms, 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"remote": {"heartbeatIntervalSecs": 5}}"#).unwrap_or_default();
        // Unknown casing falls back to defaults rather than failing.
        assert_eq!(config.remote.reconnect_initial_ms, 1);

        let config: Config =
            serde_json::from_str(r#"{"remote": {"heartbeat_interval_secs": 5}}"#).unwrap();
        assert_eq!(config.remote.heartbeat_interval_secs, 5);
    }
}
