//! User-visible link status.

use std::fmt;

use crossbeam_channel::Sender;
use tracing::{info, warn};

/// Why a link ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The host could not be made discoverable.
    DiscoverabilityUnavailable(String),
    /// No peer connected within the allowed attempts.
    AcceptExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The accepted connection could not be set up.
    SessionSetup(String),
    /// The connection broke while in use.
    TransportFault(String),
}

impl FailureReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::DiscoverabilityUnavailable(_) => "discoverability",
            FailureReason::AcceptExhausted { .. } => "accept_exhausted",
            FailureReason::SessionSetup(_) => "session_setup",
            FailureReason::TransportFault(_) => "transport_fault",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DiscoverabilityUnavailable(e) => {
                write!(f, "discoverability unavailable: {}", e)
            }
            FailureReason::AcceptExhausted { attempts } => {
                write!(f, "no connection after {} attempts", attempts)
            }
            FailureReason::SessionSetup(e) => write!(f, "session setup failed: {}", e),
            FailureReason::TransportFault(e) => write!(f, "transport fault: {}", e),
        }
    }
}

/// Status reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Waiting for discoverability or for a peer.
    Connecting,
    /// A peer is connected.
    Connected {
        /// Peer description.
        peer: String,
    },
    /// The link was stopped on request.
    Disconnected,
    /// The link failed; it will not reconnect.
    Failed(FailureReason),
}

/// Receives status updates.
pub trait StatusSink: Send + Sync {
    /// Report a status change.
    fn report(&self, status: LinkStatus);
}

impl StatusSink for Sender<LinkStatus> {
    fn report(&self, status: LinkStatus) {
        // Nobody listening is fine
        let _ = self.send(status);
    }
}

/// Logs status changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn report(&self, status: LinkStatus) {
        match status {
            LinkStatus::Connecting => info!("Status: connecting"),
            LinkStatus::Connected { peer } => info!("Status: connected to {}", peer),
            LinkStatus::Disconnected => info!("Status: disconnected"),
            LinkStatus::Failed(reason) => warn!("Status: failed ({})", reason),
        }
    }
}
