//! Link configuration.
//!
//! Loaded from YAML; every field has a default so an empty file is valid.
//!
//! ```yaml
//! transport:
//!   kind: tcp
//!   address: "127.0.0.1:2323"
//! max_accept_attempts: 10
//! retry_delay_ms: 1000
//! discoverable_secs: 300
//! source:
//!   kind: read_store
//!   inbox_path: inbox.jsonl
//!   poll_interval_ms: 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LinkError, LinkResult};
use crate::transport::{Acceptor, TcpAcceptor};

/// Default listening address.
pub const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:2323";
/// Accept attempts before giving up.
pub const DEFAULT_MAX_ACCEPT_ATTEMPTS: u32 = 10;
/// Pause between failed accept attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// How long discoverability is requested for.
pub const DEFAULT_DISCOVERABLE_SECS: u64 = 300;
/// Read store polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Where the link listens for its peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// TCP socket address.
    Tcp {
        /// Address to bind, e.g. `0.0.0.0:2323`.
        address: String,
    },
    /// Unix-domain socket path.
    Unix {
        /// Socket file path.
        path: PathBuf,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp {
            address: DEFAULT_TCP_ADDRESS.to_string(),
        }
    }
}

impl TransportConfig {
    /// Build the acceptor for this endpoint.
    pub fn build_acceptor(&self) -> LinkResult<Box<dyn Acceptor>> {
        match self {
            TransportConfig::Tcp { address } => Ok(Box::new(TcpAcceptor::new(address.clone()))),
            #[cfg(unix)]
            TransportConfig::Unix { path } => {
                Ok(Box::new(crate::transport::UnixAcceptor::new(path.clone())))
            }
            #[cfg(not(unix))]
            TransportConfig::Unix { .. } => Err(LinkError::Config(ConfigError::Invalid(
                "unix transport is not available on this platform".into(),
            ))),
        }
    }
}

/// Which message source feeds the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Messages read in an inbox store.
    #[default]
    ReadStore,
    /// Every newly arriving message.
    NewArrival,
}

/// Message source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source variant.
    pub kind: SourceKind,
    /// JSON-lines inbox watched by the read store source.
    pub inbox_path: Option<PathBuf>,
    /// Read store polling interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            kind: SourceKind::default(),
            inbox_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SourceConfig {
    /// Polling interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Listening endpoint.
    pub transport: TransportConfig,
    /// Accept attempts before the link fails.
    pub max_accept_attempts: u32,
    /// Pause between failed accept attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Discoverability duration requested on start, in seconds.
    pub discoverable_secs: u64,
    /// Message source.
    pub source: SourceConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            transport: TransportConfig::default(),
            max_accept_attempts: DEFAULT_MAX_ACCEPT_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            discoverable_secs: DEFAULT_DISCOVERABLE_SECS,
            source: SourceConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file without validating it, for callers that apply
    /// overrides first.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&content)
    }

    fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null, not as an empty mapping
        if yaml.trim().is_empty() {
            return Ok(LinkConfig::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Check that the link can run with these settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_accept_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_accept_attempts must be at least 1".into(),
            ));
        }
        if self.source.kind == SourceKind::ReadStore && self.source.inbox_path.is_none() {
            return Err(ConfigError::Invalid(
                "source.inbox_path is required for the read_store source".into(),
            ));
        }
        if self.source.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "source.poll_interval_ms must be positive".into(),
            ));
        }
        if let TransportConfig::Tcp { address } = &self.transport {
            if address.trim().is_empty() {
                return Err(ConfigError::Invalid("transport.address is empty".into()));
            }
        }
        Ok(())
    }

    /// Pause between failed accept attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Discoverability duration.
    pub fn discoverable_duration(&self) -> Duration {
        Duration::from_secs(self.discoverable_secs)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> LinkResult<String> {
        serde_yaml::to_string(self).map_err(|e| LinkError::Config(ConfigError::Parse(e)))
    }
}
