//! Connection lifecycle.
//!
//! The [`ConnectionManager`] takes the link from start to a terminal state:
//!
//! ```text
//! Idle -> AwaitingDiscoverability -> Listening -> Connected -> ShuttingDown -> Stopped
//!                 |                      |                          |
//!                 +----------------------+--------------------------+-------> Failed
//! ```
//!
//! A supervisor thread owns the state and consumes [`ManagerEvent`]s: scan
//! mode changes, the outcome of the accept thread, I/O failures from the
//! session loops and stop requests. Events that make no sense in the current
//! state are logged and dropped. There is no reconnection; once the link is
//! `Stopped` or `Failed` the manager is done.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::cancel::StopToken;
use crate::config::LinkConfig;
use crate::discovery::{Discoverability, DiscoverabilityRequest, ScanMode};
use crate::error::{IoFailure, LinkResult};
use crate::reader::{PendingMessages, ReaderLoop};
use crate::source::MessageSource;
use crate::status::{FailureReason, LinkStatus, StatusSink};
use crate::telemetry::metric_defs;
use crate::transport::{Acceptor, Transport};
use crate::writer::WriterChannel;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Created, not started.
    #[default]
    Idle,
    /// Waiting for the platform to make the host discoverable.
    AwaitingDiscoverability,
    /// Accepting a peer.
    Listening,
    /// A peer is connected and the session loops are running.
    Connected,
    /// Tearing the session down.
    ShuttingDown,
    /// Stopped on request.
    Stopped,
    /// Ended by a fault.
    Failed,
}

impl LinkState {
    /// Check if no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Stopped | LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The current state, observable from other threads.
#[derive(Debug, Default)]
struct StateCell {
    state: Mutex<LinkState>,
    changed: Condvar,
}

impl StateCell {
    fn get(&self) -> LinkState {
        *self.state.lock()
    }

    fn set(&self, state: LinkState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    /// Block until `pred` holds or `timeout` passes; returns the last state.
    fn wait_until(&self, timeout: Option<Duration>, pred: impl Fn(LinkState) -> bool) -> LinkState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.state.lock();
        while !pred(*guard) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut guard),
            }
        }
        *guard
    }
}

// ============================================================================
// Accept with retry
// ============================================================================

/// Result of the accept loop.
pub enum AcceptOutcome {
    /// A peer connected.
    Connected {
        /// The accepted connection.
        transport: Box<dyn Transport>,
        /// Attempt that succeeded, from 1.
        attempt: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Stop was requested before a peer connected.
    Aborted,
}

impl fmt::Debug for AcceptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptOutcome::Connected { transport, attempt } => f
                .debug_struct("Connected")
                .field("peer", &transport.peer())
                .field("attempt", attempt)
                .finish(),
            AcceptOutcome::Exhausted { attempts } => f
                .debug_struct("Exhausted")
                .field("attempts", attempts)
                .finish(),
            AcceptOutcome::Aborted => f.write_str("Aborted"),
        }
    }
}

/// Accept one peer, retrying up to `max_attempts` times.
///
/// Sleeps `retry_delay` between attempts but not after the last one. A stop
/// during an attempt or during the sleep aborts without counting as failure.
pub fn accept_with_retry(
    acceptor: &mut dyn Acceptor,
    max_attempts: u32,
    retry_delay: Duration,
    stop: &StopToken,
) -> AcceptOutcome {
    for attempt in 1..=max_attempts {
        if stop.is_stopped() {
            return AcceptOutcome::Aborted;
        }
        metrics::counter!(metric_defs::ACCEPT_ATTEMPTS.name).increment(1);
        debug!(
            "Accept attempt {}/{} on {}",
            attempt,
            max_attempts,
            acceptor.describe()
        );

        match acceptor.accept(stop) {
            Ok(transport) => return AcceptOutcome::Connected { transport, attempt },
            Err(e) => {
                if stop.is_stopped() {
                    debug!("Accept interrupted by stop: {}", e);
                    return AcceptOutcome::Aborted;
                }
                warn!(
                    "Accept attempt {}/{} on {} failed: {}",
                    attempt,
                    max_attempts,
                    acceptor.describe(),
                    e
                );
            }
        }

        if attempt < max_attempts && stop.sleep(retry_delay) {
            return AcceptOutcome::Aborted;
        }
    }
    AcceptOutcome::Exhausted {
        attempts: max_attempts,
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Timing settings of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Accept attempts before failing.
    pub max_accept_attempts: u32,
    /// Pause between failed accept attempts.
    pub retry_delay: Duration,
    /// Discoverability duration to request.
    pub discoverable_duration: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for ManagerConfig {
    fn from(config: &LinkConfig) -> Self {
        ManagerConfig {
            max_accept_attempts: config.max_accept_attempts,
            retry_delay: config.retry_delay(),
            discoverable_duration: config.discoverable_duration(),
        }
    }
}

/// The collaborators a link is built from.
pub struct LinkParts {
    /// Accepts the peer.
    pub acceptor: Box<dyn Acceptor>,
    /// Makes the host discoverable.
    pub discoverability: Box<dyn Discoverability>,
    /// Feeds outbound messages.
    pub source: Box<dyn MessageSource>,
    /// Receives status updates.
    pub status: Arc<dyn StatusSink>,
}

/// Events consumed by the supervisor.
pub enum ManagerEvent {
    /// The platform reported a new scan mode.
    ScanModeChanged(ScanMode),
    /// The accept thread finished.
    AcceptFinished(AcceptOutcome),
    /// Stop requested.
    Stop,
}

impl fmt::Debug for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerEvent::ScanModeChanged(mode) => write!(f, "ScanModeChanged({:?})", mode),
            ManagerEvent::AcceptFinished(outcome) => write!(f, "AcceptFinished({:?})", outcome),
            ManagerEvent::Stop => f.write_str("Stop"),
        }
    }
}

/// Entry point for running a link.
pub struct ConnectionManager;

impl ConnectionManager {
    /// Start the supervisor. The returned handle controls and observes it.
    pub fn start(config: ManagerConfig, parts: LinkParts) -> LinkResult<ManagerHandle> {
        let (events_tx, events_rx) = unbounded();
        let (faults_tx, faults_rx) = unbounded();
        let stop = StopToken::new();
        let state = Arc::new(StateCell::default());
        let attempts = Arc::new(AtomicU32::new(0));

        let supervisor = Supervisor {
            config,
            acceptor: Some(parts.acceptor),
            discoverability: parts.discoverability,
            source: parts.source,
            status: parts.status,
            state: Arc::clone(&state),
            stop: stop.clone(),
            events: events_tx.clone(),
            faults: faults_tx,
            attempts: Arc::clone(&attempts),
            accept_thread: None,
            session: None,
        };

        let thread = thread::Builder::new()
            .name("modemsim-supervisor".to_string())
            .spawn(move || supervisor.run(events_rx, faults_rx))?;

        Ok(ManagerHandle {
            events: events_tx,
            stop,
            state,
            attempts,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }
}

/// Controls a running link.
#[derive(Clone)]
pub struct ManagerHandle {
    events: Sender<ManagerEvent>,
    stop: StopToken,
    state: Arc<StateCell>,
    attempts: Arc<AtomicU32>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ManagerHandle {
    /// Report a scan mode change from the platform.
    pub fn discoverability_changed(&self, mode: ScanMode) {
        let _ = self.events.send(ManagerEvent::ScanModeChanged(mode));
    }

    /// Request a controlled stop. Safe to call from any thread, repeatedly.
    pub fn stop(&self) {
        if self.stop.stop() {
            info!("Stop requested");
        }
        let _ = self.events.send(ManagerEvent::Stop);
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    /// Accept attempts made so far.
    pub fn accept_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Block until `state` is reached or `timeout` passes.
    ///
    /// Returns the state at return time.
    pub fn wait_for(&self, state: LinkState, timeout: Duration) -> LinkState {
        self.state
            .wait_until(Some(timeout), |s| s == state || s.is_terminal())
    }

    /// Block until the link is terminal and its threads have exited.
    pub fn wait(&self) -> LinkState {
        let state = self.state.wait_until(None, LinkState::is_terminal);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("Supervisor thread panicked");
            }
        }
        state
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LinkState> {
        let state = self.state.wait_until(Some(timeout), LinkState::is_terminal);
        if state.is_terminal() {
            Some(self.wait())
        } else {
            None
        }
    }
}

/// What ended a session.
enum ShutdownCause {
    Stop,
    Fault(FailureReason),
}

/// One accepted connection and its loops.
struct Session {
    transport: Arc<dyn Transport>,
    writer: WriterChannel,
    reader: ReaderLoop,
}

/// Supervisor thread state.
struct Supervisor {
    config: ManagerConfig,
    acceptor: Option<Box<dyn Acceptor>>,
    discoverability: Box<dyn Discoverability>,
    source: Box<dyn MessageSource>,
    status: Arc<dyn StatusSink>,
    state: Arc<StateCell>,
    stop: StopToken,
    events: Sender<ManagerEvent>,
    faults: Sender<IoFailure>,
    attempts: Arc<AtomicU32>,
    accept_thread: Option<JoinHandle<()>>,
    session: Option<Session>,
}

impl Supervisor {
    fn run(mut self, events: Receiver<ManagerEvent>, faults: Receiver<IoFailure>) {
        self.state.set(LinkState::Idle);
        self.begin();

        while !self.state.get().is_terminal() {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.handle(event),
                    // Unreachable while we hold a sender
                    Err(_) => self.shutdown(ShutdownCause::Stop),
                },
                recv(faults) -> failure => {
                    if let Ok(failure) = failure {
                        self.on_io_failure(failure);
                    }
                },
            }
        }

        // Release anything still waiting on the manager token
        self.stop.stop();
        if let Some(thread) = self.accept_thread.take() {
            if thread.join().is_err() {
                error!("Accept thread panicked");
            }
        }
        info!("Link finished in state {}", self.state.get());
    }

    fn transition(&mut self, next: LinkState) {
        let current = self.state.get();
        if current != next {
            info!("Link state {} -> {}", current, next);
            self.state.set(next);
        }
    }

    fn begin(&mut self) {
        self.transition(LinkState::AwaitingDiscoverability);
        self.status.report(LinkStatus::Connecting);

        match self
            .discoverability
            .request_discoverable(self.config.discoverable_duration)
        {
            Ok(DiscoverabilityRequest::AlreadyDiscoverable) => self.start_listening(),
            Ok(DiscoverabilityRequest::Requested) => {
                debug!("Waiting for the host to become discoverable");
            }
            Err(e) => {
                error!("Discoverability request failed: {}", e);
                self.fail(FailureReason::DiscoverabilityUnavailable(e.to_string()));
            }
        }
    }

    fn handle(&mut self, event: ManagerEvent) {
        let state = self.state.get();
        match (state, event) {
            (_, ManagerEvent::Stop) => self.shutdown(ShutdownCause::Stop),

            (
                LinkState::AwaitingDiscoverability,
                ManagerEvent::ScanModeChanged(ScanMode::ConnectableDiscoverable),
            ) => self.start_listening(),
            (_, ManagerEvent::ScanModeChanged(ScanMode::ConnectableDiscoverable)) => {
                warn!("Ignoring discoverability signal in state {}", state);
            }
            (_, ManagerEvent::ScanModeChanged(mode)) => {
                debug!("Scan mode changed to {:?}", mode);
            }

            (LinkState::Listening, ManagerEvent::AcceptFinished(outcome)) => {
                self.on_accept_finished(outcome);
            }
            (_, ManagerEvent::AcceptFinished(outcome)) => {
                if let AcceptOutcome::Connected { transport, .. } = outcome {
                    warn!(
                        "Dropping connection from {} accepted in state {}",
                        transport.peer(),
                        state
                    );
                    if let Err(e) = transport.close() {
                        debug!("Close failed: {}", e);
                    }
                }
            }
        }
    }

    fn start_listening(&mut self) {
        let Some(mut acceptor) = self.acceptor.take() else {
            warn!("Rejecting second start of acceptance");
            return;
        };
        self.transition(LinkState::Listening);

        let max_attempts = self.config.max_accept_attempts;
        let retry_delay = self.config.retry_delay;
        let stop = self.stop.clone();
        let events = self.events.clone();
        let attempts = Arc::clone(&self.attempts);

        let spawned = thread::Builder::new()
            .name("modemsim-accept".to_string())
            .spawn(move || {
                let mut counting = CountingAcceptor {
                    inner: &mut *acceptor,
                    attempts,
                };
                let outcome = accept_with_retry(&mut counting, max_attempts, retry_delay, &stop);
                let _ = events.send(ManagerEvent::AcceptFinished(outcome));
            });

        match spawned {
            Ok(thread) => self.accept_thread = Some(thread),
            Err(e) => {
                error!("Could not start accept thread: {}", e);
                self.fail(FailureReason::SessionSetup(e.to_string()));
            }
        }
    }

    fn on_accept_finished(&mut self, outcome: AcceptOutcome) {
        match outcome {
            AcceptOutcome::Connected { transport, attempt } => {
                info!("Peer {} connected on attempt {}", transport.peer(), attempt);
                self.start_session(Arc::from(transport));
            }
            AcceptOutcome::Exhausted { attempts } => {
                error!("No peer connected after {} attempts", attempts);
                self.fail(FailureReason::AcceptExhausted { attempts });
            }
            AcceptOutcome::Aborted => {
                // The stop event that caused this finishes the shutdown
                debug!("Accept aborted");
            }
        }
    }

    fn start_session(&mut self, transport: Arc<dyn Transport>) {
        let session_stop = self.stop.child();
        match self.open_session(&transport, &session_stop) {
            Ok(session) => {
                metrics::counter!(metric_defs::CONNECTIONS.name).increment(1);
                let peer = session.transport.peer();
                self.session = Some(session);
                self.transition(LinkState::Connected);
                self.status.report(LinkStatus::Connected { peer });
            }
            Err(e) => {
                error!("Could not start session: {}", e);
                session_stop.stop();
                self.source.stop();
                if let Err(e) = transport.close() {
                    debug!("Close failed: {}", e);
                }
                self.fail(FailureReason::SessionSetup(e.to_string()));
            }
        }
    }

    fn open_session(
        &mut self,
        transport: &Arc<dyn Transport>,
        session_stop: &StopToken,
    ) -> LinkResult<Session> {
        let writer = WriterChannel::spawn(
            transport.writer()?,
            session_stop.child(),
            self.faults.clone(),
        )?;
        let reader = match transport.reader() {
            Ok(reader) => ReaderLoop::spawn(
                reader,
                writer.handle(),
                &mut *self.source,
                PendingMessages::new(),
                session_stop.child(),
                self.faults.clone(),
            ),
            Err(e) => Err(e.into()),
        };
        match reader {
            Ok(reader) => Ok(Session {
                transport: Arc::clone(transport),
                writer,
                reader,
            }),
            Err(e) => {
                writer.stop();
                writer.join();
                Err(e)
            }
        }
    }

    fn on_io_failure(&mut self, failure: IoFailure) {
        if self.state.get() == LinkState::Connected {
            error!("Connection lost: {}", failure);
            self.shutdown(ShutdownCause::Fault(FailureReason::TransportFault(
                failure.to_string(),
            )));
        } else {
            debug!("Ignoring {} in state {}", failure, self.state.get());
        }
    }

    fn shutdown(&mut self, cause: ShutdownCause) {
        if self.state.get().is_terminal() {
            return;
        }
        self.transition(LinkState::ShuttingDown);

        if let Some(session) = self.session.take() {
            session.writer.stop();
            session.reader.stop();
            self.source.stop();
            if let Err(e) = session.transport.close() {
                warn!("Error closing transport: {}", e);
            }
            session.writer.join();
            session.reader.join();
        } else {
            self.source.stop();
        }
        self.stop.stop();

        match cause {
            ShutdownCause::Stop => {
                self.transition(LinkState::Stopped);
                self.status.report(LinkStatus::Disconnected);
            }
            ShutdownCause::Fault(reason) => self.fail(reason),
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        metrics::counter!(metric_defs::LINK_FAILURES.name, "reason" => reason.label()).increment(1);
        self.source.stop();
        self.stop.stop();
        self.transition(LinkState::Failed);
        self.status.report(LinkStatus::Failed(reason));
    }
}

/// Counts attempts for [`ManagerHandle::accept_attempts`].
struct CountingAcceptor<'a> {
    inner: &'a mut dyn Acceptor,
    attempts: Arc<AtomicU32>,
}

impl Acceptor for CountingAcceptor<'_> {
    fn accept(&mut self, stop: &StopToken) -> std::io::Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.accept(stop)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
