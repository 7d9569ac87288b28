//! Connection side of the modem emulator.
//!
//! This crate carries the AT protocol from `modemsim-at-protocol` over a real
//! byte stream and owns the connection's lifecycle:
//!
//! - [`transport`]: accepted socket connections and the acceptors that
//!   produce them (TCP, Unix-domain sockets)
//! - [`writer`]: the serialized sender to the peer
//! - [`reader`]: command handling and new message notifications
//! - [`source`]: where outbound messages come from
//! - [`manager`]: discoverability, accept with retry, coordinated shutdown
//!
//! # Threads
//!
//! A running link uses one thread each for the supervisor, the accept loop,
//! the reader's line loop, the reader's relay, the writer and the message
//! source. They talk over `crossbeam-channel` and share a [`StopToken`] per
//! scope, so a stop unblocks every channel wait and closing the transport
//! unblocks the I/O.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modemsim_link::{
//!     AlwaysDiscoverable, ConnectionManager, LinkConfig, LinkParts, LogStatusSink,
//!     ManagerConfig, build_source,
//! };
//!
//! let config = LinkConfig::load("modemsim.yaml")?;
//! let parts = LinkParts {
//!     acceptor: config.transport.build_acceptor()?,
//!     discoverability: Box::new(AlwaysDiscoverable),
//!     source: build_source(&config.source, None)?,
//!     status: Arc::new(LogStatusSink),
//! };
//! let handle = ConnectionManager::start(ManagerConfig::from(&config), parts)?;
//! let final_state = handle.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod reader;
pub mod source;
pub mod status;
pub mod telemetry;
pub mod transport;
pub mod writer;

pub use cancel::StopToken;
pub use config::{LinkConfig, SourceConfig, SourceKind, TransportConfig};
pub use discovery::{
    AlwaysDiscoverable, Discoverability, DiscoverabilityRequest, ManualDiscoverability, ScanMode,
};
pub use error::{Component, ConfigError, IoFailure, LinkError, LinkResult};
pub use manager::{
    accept_with_retry, AcceptOutcome, ConnectionManager, LinkParts, LinkState, ManagerConfig,
    ManagerHandle,
};
pub use reader::{PendingMessages, ReaderLoop};
pub use source::{
    build_source, JsonLinesInbox, MessageListener, MessageSource, MessageStore, NewArrivalSource,
    ReadStoreSource, StoredMessage,
};
pub use status::{FailureReason, LinkStatus, LogStatusSink, StatusSink};
pub use transport::{Acceptor, DuplexSocket, SocketTransport, TcpAcceptor, Transport};
#[cfg(unix)]
pub use transport::UnixAcceptor;
pub use writer::{WriterChannel, WriterClosed, WriterHandle};
