//! The session's inbound side.
//!
//! Two threads share the connection's [`PendingMessages`]:
//! - the line thread frames commands, answers them through the interpreter
//!   and queues the response
//! - the relay thread takes messages from the source, appends them and
//!   queues the `+CMTI` notification carrying their index
//!
//! Both end on the session stop token. Only the line thread can fail, when
//! the stream breaks underneath it.

use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};
use modemsim_at_protocol::{interpret, LineFramer, MessageUnit, Reply, Response};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::cancel::StopToken;
use crate::error::{Component, IoFailure, LinkResult};
use crate::source::{MessageListener, MessageSource};
use crate::telemetry::metric_defs;
use crate::writer::WriterHandle;

/// Messages handed to the peer during one connection.
///
/// Append-only, so an index announced to the peer stays valid until the
/// connection ends.
#[derive(Debug, Clone, Default)]
pub struct PendingMessages {
    inner: Arc<RwLock<Vec<MessageUnit>>>,
}

impl PendingMessages {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its index.
    pub fn append(&self, message: MessageUnit) -> usize {
        let mut messages = self.inner.write();
        messages.push(message);
        messages.len() - 1
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if no message has been appended.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Message at `index`.
    pub fn get(&self, index: usize) -> Option<MessageUnit> {
        self.inner.read().get(index).cloned()
    }

    /// Run `f` with read access to the messages.
    pub fn with_messages<T>(&self, f: impl FnOnce(&[MessageUnit]) -> T) -> T {
        f(&self.inner.read())
    }
}

/// The running reader threads of one connection.
pub struct ReaderLoop {
    stop: StopToken,
    pending: PendingMessages,
    line_thread: Option<JoinHandle<()>>,
    relay_thread: Option<JoinHandle<()>>,
}

impl ReaderLoop {
    /// Subscribe to `source` and start reading commands from `reader`.
    pub fn spawn(
        reader: Box<dyn Read + Send>,
        writer: WriterHandle,
        source: &mut dyn MessageSource,
        pending: PendingMessages,
        stop: StopToken,
        faults: Sender<IoFailure>,
    ) -> LinkResult<Self> {
        let (listener, events) = MessageListener::channel();
        source.subscribe(listener)?;
        debug!("Subscribed to {} source", source.name());

        let relay_thread = {
            let pending = pending.clone();
            let writer = writer.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("modemsim-relay".to_string())
                .spawn(move || relay_loop(events, pending, writer, stop))?
        };

        let line_thread = {
            let pending = pending.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("modemsim-reader".to_string())
                .spawn(move || line_loop(reader, pending, writer, stop, faults))
        };
        let line_thread = match line_thread {
            Ok(thread) => thread,
            Err(e) => {
                stop.stop();
                let _ = relay_thread.join();
                return Err(e.into());
            }
        };

        Ok(ReaderLoop {
            stop,
            pending,
            line_thread: Some(line_thread),
            relay_thread: Some(relay_thread),
        })
    }

    /// The connection's pending message list.
    pub fn pending(&self) -> &PendingMessages {
        &self.pending
    }

    /// Ask both threads to exit.
    ///
    /// A line thread blocked in a read only returns once the transport is
    /// closed.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for both threads to exit.
    pub fn join(mut self) {
        for thread in [self.relay_thread.take(), self.line_thread.take()]
            .into_iter()
            .flatten()
        {
            if thread.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

fn line_loop(
    reader: Box<dyn Read + Send>,
    pending: PendingMessages,
    writer: WriterHandle,
    stop: StopToken,
    faults: Sender<IoFailure>,
) {
    for line in LineFramer::new(reader) {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                if stop.is_stopped() {
                    debug!("Reader stopped: {}", e);
                } else {
                    warn!("Read from peer failed: {}", e);
                    let _ = faults.send(IoFailure::new(Component::Reader, e));
                }
                break;
            }
        };
        if stop.is_stopped() {
            break;
        }

        debug!("From peer: {:?}", line);
        let reply = pending.with_messages(|messages| interpret(&line, messages));
        record_command(&reply);

        let encoded = reply.response.encode();
        debug!("To peer: {:?}", encoded);
        if writer.send(encoded).is_err() {
            debug!("Writer gone, reader exiting");
            break;
        }
    }
    trace!("Line thread exiting");
}

fn record_command(reply: &Reply) {
    metrics::counter!(metric_defs::COMMANDS_HANDLED.name, "command" => reply.command_name())
        .increment(1);
    if reply.response.is_error() {
        metrics::counter!(metric_defs::PROTOCOL_ERRORS.name).increment(1);
    }
}

fn relay_loop(
    events: Receiver<MessageUnit>,
    pending: PendingMessages,
    writer: WriterHandle,
    stop: StopToken,
) {
    loop {
        let message = select! {
            recv(stop.signal()) -> _ => break,
            recv(events) -> event => match event {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        let index = pending.append(message);
        metrics::gauge!(metric_defs::PENDING_MESSAGES.name).set((index + 1) as f64);
        info!("New message queued at index {}", index);

        let notification = Response::NewMessage { index }.encode();
        debug!("To peer: {:?}", notification);
        if writer.send(notification).is_err() {
            break;
        }
        metrics::counter!(metric_defs::NOTIFICATIONS_SENT.name).increment(1);
    }
    trace!("Relay thread exiting");
}
