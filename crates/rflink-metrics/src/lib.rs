//! Metrics for RFLink gateway connections and the relay.
//!
//! Every metric is declared once as a [`Metric`] constant in [`metric_defs`]
//! and recorded through the `metrics` facade. Nothing is exported unless the
//! application installs a recorder; with the `prometheus` feature,
//! [`install_prometheus`] sets one up.
//!
//! ```rust
//! use rflink_metrics::{metric_defs, ConnectionLabels};
//!
//! let labels = ConnectionLabels::new("tcp", "localhost:1234");
//! metrics::counter!(metric_defs::PACKETS_RECEIVED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use rflink_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const FRAMES: Metric = Metric::counter("rflink.test.frames")
///     .with_description("Frames seen")
///     .with_unit(Unit::Count)
///     .with_labels(&["transport"]);
///
/// assert_eq!(FRAMES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name (`rflink.connection.packets_received`).
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every connection-scoped metric.
    pub const CONNECTION_LABELS: &[&str] = &["transport", "endpoint"];

    // ========================================================================
    // Gateway connection
    // ========================================================================

    /// Valid packet lines read from the gateway.
    pub const PACKETS_RECEIVED: Metric = Metric::counter("rflink.connection.packets_received")
        .with_description("Valid packet lines read from the gateway")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    /// Lines that failed the packet grammar and were dropped.
    pub const INVALID_LINES: Metric = Metric::counter("rflink.connection.invalid_lines")
        .with_description("Lines dropped for failing the packet grammar")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    /// Command lines written to the gateway.
    pub const COMMANDS_SENT: Metric = Metric::counter("rflink.command.sent")
        .with_description("Command lines written to the gateway")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    /// Acknowledgments received for commands, by outcome.
    ///
    /// Labels: transport, endpoint, outcome (`ok` or `unknown`)
    pub const COMMANDS_ACKED: Metric = Metric::counter("rflink.command.acked")
        .with_description("Command acknowledgments received")
        .with_unit(Unit::Count)
        .with_labels(&["transport", "endpoint", "outcome"]);

    /// Commands that got no acknowledgment in time.
    pub const COMMAND_TIMEOUTS: Metric = Metric::counter("rflink.command.timeouts")
        .with_description("Commands without an acknowledgment before the timeout")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    /// Time from writing a command to its acknowledgment.
    pub const COMMAND_ACK_LATENCY: Metric = Metric::histogram("rflink.command.ack_latency_ms")
        .with_description("Time from writing a command to its acknowledgment")
        .with_unit(Unit::Milliseconds)
        .with_labels(CONNECTION_LABELS);

    // ========================================================================
    // Event pipeline
    // ========================================================================

    /// Events delivered to the event callback.
    pub const EVENTS_DISPATCHED: Metric = Metric::counter("rflink.events.dispatched")
        .with_description("Events delivered to the event handler")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    /// Events suppressed by the ignore list.
    pub const EVENTS_IGNORED: Metric = Metric::counter("rflink.events.ignored")
        .with_description("Events suppressed by the ignore list")
        .with_unit(Unit::Count)
        .with_labels(CONNECTION_LABELS);

    // ========================================================================
    // Relay
    // ========================================================================

    /// Downstream clients currently connected to the relay.
    pub const RELAY_CLIENTS: Metric = Metric::gauge("rflink.relay.clients")
        .with_description("Downstream clients connected to the relay")
        .with_unit(Unit::Count);

    /// Upstream connection attempts made by the relay.
    ///
    /// Labels: result (`connected` or `failed`)
    pub const RELAY_RECONNECTS: Metric = Metric::counter("rflink.relay.upstream_connects")
        .with_description("Upstream connection attempts")
        .with_unit(Unit::Count)
        .with_labels(&["result"]);

    /// Lines broadcast to downstream clients.
    pub const RELAY_BROADCASTS: Metric = Metric::counter("rflink.relay.broadcasts")
        .with_description("Gateway lines broadcast to downstream clients")
        .with_unit(Unit::Count);

    pub const ALL: &[&Metric] = &[
        &PACKETS_RECEIVED,
        &INVALID_LINES,
        &COMMANDS_SENT,
        &COMMANDS_ACKED,
        &COMMAND_TIMEOUTS,
        &COMMAND_ACK_LATENCY,
        &EVENTS_DISPATCHED,
        &EVENTS_IGNORED,
        &RELAY_CLIENTS,
        &RELAY_RECONNECTS,
        &RELAY_BROADCASTS,
    ];
}

/// Labels identifying one gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLabels {
    /// `serial` or `tcp`.
    pub transport: String,
    /// Serial device path or `host:port`.
    pub endpoint: String,
}

impl ConnectionLabels {
    pub fn new(transport: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Convert to the `metrics` label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("transport", self.transport.clone()),
            ("endpoint", self.endpoint.clone()),
        ]
    }

    /// Labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describe every metric. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr` and describe
/// all metrics. Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
