//! Transport and acceptor abstractions.
//!
//! A [`Transport`] is one accepted duplex byte stream. The reader loop and the
//! writer channel each get their own cloned half, and the connection manager
//! keeps the transport itself so it can close it; closing both directions is
//! what unblocks a pending read or write.
//!
//! An [`Acceptor`] opens a listening endpoint for a single attempt, accepts
//! one peer and closes the endpoint again. Implementations are provided for
//! TCP and, on Unix, for Unix-domain sockets.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cancel::StopToken;

// ============================================================================
// Transport
// ============================================================================

/// An open duplex byte stream to the peer.
pub trait Transport: Send + Sync {
    /// A new handle for reading from the peer.
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// A new handle for writing to the peer.
    fn writer(&self) -> io::Result<Box<dyn Write + Send>>;

    /// Close both directions. Calling it again is a no-op.
    fn close(&self) -> io::Result<()>;

    /// Human readable description of the peer.
    fn peer(&self) -> String;
}

/// A socket type that can back a [`SocketTransport`].
pub trait DuplexSocket: Read + Write + Send + Sync + Sized + 'static {
    /// Clone the underlying descriptor.
    fn try_clone_socket(&self) -> io::Result<Self>;

    /// Shut down reads and writes.
    fn shutdown_socket(&self) -> io::Result<()>;
}

impl DuplexSocket for TcpStream {
    fn try_clone_socket(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_socket(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl DuplexSocket for UnixStream {
    fn try_clone_socket(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_socket(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// [`Transport`] over a connected socket.
pub struct SocketTransport<S> {
    socket: S,
    peer: String,
    closed: AtomicBool,
}

impl<S: DuplexSocket> SocketTransport<S> {
    /// Wrap a connected socket.
    pub fn new(socket: S, peer: impl Into<String>) -> Self {
        SocketTransport {
            socket,
            peer: peer.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Check if [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<S: DuplexSocket> Transport for SocketTransport<S> {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.socket.try_clone_socket()?))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.socket.try_clone_socket()?))
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing transport to {}", self.peer);
        match self.socket.shutdown_socket() {
            // The peer already hung up
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// ============================================================================
// Acceptor
// ============================================================================

/// Accepts a single peer connection per call.
pub trait Acceptor: Send {
    /// Open an endpoint, wait for one peer, close the endpoint.
    ///
    /// Must return promptly once `stop` is triggered; the error returned
    /// then is not treated as an attempt failure.
    fn accept(&mut self, stop: &StopToken) -> io::Result<Box<dyn Transport>>;

    /// Where this acceptor listens, for logging.
    fn describe(&self) -> String;
}

fn stopped_while_listening() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "stop requested while listening")
}

/// Runtime driving a single listening attempt.
///
/// Accepting is selected against the stop token, so a stop unblocks it
/// without touching the listener.
fn attempt_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
}

/// Listens on a TCP address.
#[derive(Debug, Clone)]
pub struct TcpAcceptor {
    address: String,
}

impl TcpAcceptor {
    /// Create an acceptor for `address` (e.g. `127.0.0.1:2323`).
    pub fn new(address: impl Into<String>) -> Self {
        TcpAcceptor {
            address: address.into(),
        }
    }
}

impl Acceptor for TcpAcceptor {
    fn accept(&mut self, stop: &StopToken) -> io::Result<Box<dyn Transport>> {
        let address = self.address.as_str();
        attempt_runtime()?.block_on(async {
            let listener = tokio::net::TcpListener::bind(address).await?;
            let local = listener.local_addr()?;
            info!("Listening for a peer on tcp://{}", local);

            let (stream, peer) = tokio::select! {
                biased;
                _ = stop.stopped() => return Err(stopped_while_listening()),
                accepted = listener.accept() => accepted?,
            };
            drop(listener);

            // Handed to blocking reader and writer threads from here on
            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            stream.set_nodelay(true)?;
            info!("Accepted peer {} on tcp://{}", peer, local);
            let transport: Box<dyn Transport> =
                Box::new(SocketTransport::new(stream, peer.to_string()));
            Ok::<_, io::Error>(transport)
        })
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Listens on a Unix-domain socket path.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixAcceptor {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixAcceptor {
    /// Create an acceptor for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        UnixAcceptor { path: path.into() }
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a socket file left at the path. Anything else there is an error.
    fn remove_stale_socket(&self) -> io::Result<()> {
        use std::os::unix::fs::FileTypeExt;

        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(&self.path),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", self.path.display()),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
impl Acceptor for UnixAcceptor {
    fn accept(&mut self, stop: &StopToken) -> io::Result<Box<dyn Transport>> {
        // A previous run may have left the socket file behind
        self.remove_stale_socket()?;
        let path = self.path.as_path();
        let accepted = attempt_runtime()?.block_on(async {
            let listener = tokio::net::UnixListener::bind(path)?;
            info!("Listening for a peer on unix://{}", path.display());

            let (stream, _) = tokio::select! {
                biased;
                _ = stop.stopped() => return Err(stopped_while_listening()),
                accepted = listener.accept() => accepted?,
            };
            stream.into_std()
        });
        if let Err(e) = self.remove_stale_socket() {
            debug!("Could not remove {}: {}", self.path.display(), e);
        }

        let stream = accepted?;
        stream.set_nonblocking(false)?;
        info!("Accepted peer on unix://{}", self.path.display());
        let peer = format!("unix://{}", self.path.display());
        Ok(Box::new(SocketTransport::new(stream, peer)))
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}
