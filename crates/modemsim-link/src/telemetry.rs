//! Metric declarations for the link.
//!
//! Every metric is declared once as a [`Metric`] constant so names are not
//! repeated as string literals at the call sites:
//!
//! ```rust
//! use modemsim_link::telemetry::metric_defs;
//!
//! metrics::counter!(metric_defs::ACCEPT_ATTEMPTS.name).increment(1);
//! ```
//!
//! Nothing is recorded until a recorder is installed. The binary can serve
//! them for Prometheus with [`install_prometheus`] when built with the
//! `prometheus` feature.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, Unit};

use crate::error::{LinkError, LinkResult};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "modemsim.link.connections").
    pub name: &'static str,
    /// Counter or gauge.
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
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
        }
    }
}

/// All metric definitions for the link.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // AT Session
    // ========================================================================

    /// Commands answered, by parsed command.
    ///
    /// Labels: command
    pub const COMMANDS_HANDLED: Metric = Metric::counter("modemsim.at.commands")
        .with_description("AT commands answered")
        .with_unit(Unit::Count)
        .with_labels(&["command"]);

    /// Commands answered with `ERROR`.
    pub const PROTOCOL_ERRORS: Metric = Metric::counter("modemsim.at.protocol_errors")
        .with_description("AT commands answered with ERROR")
        .with_unit(Unit::Count);

    /// Unsolicited new message notifications queued.
    pub const NOTIFICATIONS_SENT: Metric = Metric::counter("modemsim.at.notifications")
        .with_description("New message notifications sent to the peer")
        .with_unit(Unit::Count);

    /// Messages currently held for the peer.
    pub const PENDING_MESSAGES: Metric = Metric::gauge("modemsim.at.pending_messages")
        .with_description("Messages in the pending list of the current connection")
        .with_unit(Unit::Count);

    // ========================================================================
    // Link
    // ========================================================================

    /// Bytes written to the peer.
    pub const BYTES_WRITTEN: Metric = Metric::counter("modemsim.link.bytes_written")
        .with_description("Bytes written to the peer")
        .with_unit(Unit::Bytes);

    /// Accept attempts made.
    pub const ACCEPT_ATTEMPTS: Metric = Metric::counter("modemsim.link.accept_attempts")
        .with_description("Connection accept attempts")
        .with_unit(Unit::Count);

    /// Peers accepted.
    pub const CONNECTIONS: Metric = Metric::counter("modemsim.link.connections")
        .with_description("Peer connections established")
        .with_unit(Unit::Count);

    /// Links that ended in failure, by reason.
    ///
    /// Labels: reason
    pub const LINK_FAILURES: Metric = Metric::counter("modemsim.link.failures")
        .with_description("Links that ended in the failed state")
        .with_unit(Unit::Count)
        .with_labels(&["reason"]);

    /// Every metric, for [`describe_metrics`](super::describe_metrics).
    pub const ALL: &[&Metric] = &[
        &COMMANDS_HANDLED,
        &PROTOCOL_ERRORS,
        &NOTIFICATIONS_SENT,
        &PENDING_MESSAGES,
        &BYTES_WRITTEN,
        &ACCEPT_ATTEMPTS,
        &CONNECTIONS,
        &LINK_FAILURES,
    ];
}

/// Register descriptions for all metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install the Prometheus exporter, scraped over HTTP at `address`, and
/// describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(address: SocketAddr) -> LinkResult<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| LinkError::Metrics(e.to_string()))?;
    describe_metrics();
    tracing::info!("Serving metrics on http://{}/metrics", address);
    Ok(())
}

/// Install the Prometheus exporter, scraped over HTTP at `address`, and
/// describe all metrics.
#[cfg(not(feature = "prometheus"))]
pub fn install_prometheus(address: SocketAddr) -> LinkResult<()> {
    Err(LinkError::Metrics(format!(
        "cannot serve metrics on {}: built without the `prometheus` feature",
        address
    )))
}
