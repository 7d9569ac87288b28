//! Error types for the link layer.

use std::fmt;
use std::path::PathBuf;

use modemsim_at_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur while setting up or running a link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on a socket or file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The message source could not be started or read.
    #[error("message source error: {0}")]
    Source(String),

    /// The host could not be made discoverable.
    #[error("discoverability unavailable: {0}")]
    Discoverability(String),

    /// Every accept attempt failed.
    #[error("no connection after {attempts} accept attempts")]
    AcceptExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The metrics exporter could not be installed.
    #[error("metrics exporter error: {0}")]
    Metrics(String),

    /// Protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors loading or validating a [`LinkConfig`](crate::config::LinkConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the link cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which I/O loop of a session hit a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// The reader loop (framing or read error).
    Reader,
    /// The writer channel (write error).
    Writer,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Reader => write!(f, "reader"),
            Component::Writer => write!(f, "writer"),
        }
    }
}

/// An uncontrolled transport fault raised by a session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoFailure {
    /// Loop that observed the fault.
    pub component: Component,
    /// Rendered error.
    pub error: String,
}

impl IoFailure {
    /// Create a failure report for `component`.
    pub fn new(component: Component, error: impl fmt::Display) -> Self {
        IoFailure {
            component,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.component, self.error)
    }
}
