//! Relay configuration.

use std::path::Path;
use std::time::Duration;

use rflink_client::{ConnectionConfig, Endpoint};
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Default TCP port the relay listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 1337;

/// Default serial device of the gateway.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";

/// Configuration for the relay server.
///
/// Every field has a default, so a YAML file only needs the keys it
/// changes:
///
/// ```yaml
/// listen_port: 1338
/// repeat: 2
/// endpoint:
///   type: tcp
///   host: rflink.local
///   port: 1234
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to bind the client listener to.
    pub listen_host: String,

    /// Port to bind the client listener to. 0 picks a free port.
    pub listen_port: u16,

    /// The upstream gateway.
    pub endpoint: Endpoint,

    /// How many times each client command is sent to the gateway.
    /// Only the first send is acknowledged back to the client.
    pub repeat: u32,

    /// Upper bound on a single upstream connection attempt (milliseconds).
    pub connect_timeout_ms: u64,

    /// Pause between failed upstream connection attempts (milliseconds).
    pub reconnect_interval_ms: u64,

    /// How long to wait for the gateway to acknowledge a command
    /// (milliseconds).
    pub ack_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            endpoint: Endpoint::serial(DEFAULT_SERIAL_PORT),
            repeat: 1,
            connect_timeout_ms: 10_000,
            reconnect_interval_ms: 10_000,
            ack_timeout_ms: 5000,
        }
    }
}

impl ProxyConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ProxyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> ProxyResult<Self> {
        let config: ProxyConfig =
            serde_yaml::from_str(text).map_err(|e| ProxyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if self.repeat == 0 {
            return Err(ProxyError::Config("repeat must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_reconnect_timing(mut self, connect_timeout: Duration, interval: Duration) -> Self {
        self.connect_timeout_ms = connect_timeout.as_millis() as u64;
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout_ms = ack_timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Settings for the upstream connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default().with_ack_timeout(Duration::from_millis(self.ack_timeout_ms))
    }

    /// `host:port` the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:1337");
        assert_eq!(config.endpoint, Endpoint::serial("/dev/ttyACM0"));
        assert_eq!(config.repeat, 1);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(10));
        assert_eq!(config.connection_config().ack_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_yaml() {
        let config = ProxyConfig::from_yaml_str(
            "listen_port: 1338\nrepeat: 3\nendpoint:\n  type: tcp\n  host: rflink.local\n  port: 1234\n",
        )
        .unwrap();
        assert_eq!(config.listen_port, 1338);
        assert_eq!(config.repeat, 3);
        assert_eq!(config.endpoint, Endpoint::tcp("rflink.local", 1234));
        assert_eq!(config.listen_host, "0.0.0.0");
        assert_eq!(config.reconnect_interval_ms, 10_000);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ProxyConfig::from_yaml_str("repeat: 0\n"),
            Err(ProxyError::Config(_))
        ));
        assert!(matches!(
            ProxyConfig::from_yaml_str("listen_port: [1]\n"),
            Err(ProxyError::Config(_))
        ));
        assert!(ProxyConfig::from_yaml_file("/nonexistent/rflinkproxy.yaml").is_err());
    }
}
