//! Connection configuration.

use std::fmt;
use std::time::Duration;

use rflink_metrics::ConnectionLabels;
use serde::{Deserialize, Serialize};

use crate::pipeline::IgnoreList;

/// Default serial baud rate of the gateway.
pub const DEFAULT_BAUD: u32 = 57600;

/// How long to wait for a command acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// Where the gateway is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Endpoint {
    /// Local serial (USB) port.
    Serial {
        path: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    /// TCP bridge, e.g. a ser2net port or another relay.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn serial(path: impl Into<String>) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud: DEFAULT_BAUD,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Transport kind, `serial` or `tcp`.
    pub fn transport(&self) -> &'static str {
        match self {
            Endpoint::Serial { .. } => "serial",
            Endpoint::Tcp { .. } => "tcp",
        }
    }

    /// Metric labels for connections to this endpoint.
    pub fn labels(&self) -> ConnectionLabels {
        ConnectionLabels::new(self.transport(), self.to_string())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial { path, .. } => f.write_str(path),
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Per-connection behaviour.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long `send_command_ack` waits for the gateway's response.
    pub ack_timeout: Duration,
    /// Event ids suppressed by the event pipeline.
    pub ignore: IgnoreList,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            ignore: IgnoreList::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreList) -> Self {
        self.ignore = ignore;
        self
    }
}
