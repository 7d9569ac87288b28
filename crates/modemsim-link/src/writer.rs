//! Serialized sender to the peer.
//!
//! Responses and unsolicited notifications are produced on different threads.
//! They all go through one FIFO drained by a single writer thread, so every
//! string reaches the peer whole and in the order it was enqueued.

use std::io::Write;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::cancel::StopToken;
use crate::error::{Component, IoFailure};
use crate::telemetry::metric_defs;

/// The writer thread has exited; nothing more will be written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("writer channel closed")]
pub struct WriterClosed;

/// Cloneable handle for enqueuing strings.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: Sender<String>,
}

impl WriterHandle {
    /// Enqueue `data` for writing. Never blocks.
    pub fn send(&self, data: impl Into<String>) -> Result<(), WriterClosed> {
        self.tx.send(data.into()).map_err(|_| WriterClosed)
    }
}

/// A running writer thread.
pub struct WriterChannel {
    handle: WriterHandle,
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl WriterChannel {
    /// Start draining into `writer`.
    ///
    /// A write failure is sent once on `faults` unless `stop` has already
    /// been triggered.
    pub fn spawn(
        writer: Box<dyn Write + Send>,
        stop: StopToken,
        faults: Sender<IoFailure>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("modemsim-writer".to_string())
            .spawn(move || drain_loop(writer, rx, thread_stop, faults))?;

        Ok(WriterChannel {
            handle: WriterHandle { tx },
            stop,
            thread: Some(thread),
        })
    }

    /// A handle for enqueuing strings.
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Ask the thread to exit. Queued strings are discarded.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Writer thread panicked");
            }
        }
    }
}

fn drain_loop(
    mut writer: Box<dyn Write + Send>,
    rx: Receiver<String>,
    stop: StopToken,
    faults: Sender<IoFailure>,
) {
    loop {
        let data = select! {
            recv(stop.signal()) -> _ => break,
            recv(rx) -> msg => match msg {
                Ok(data) => data,
                // Every handle is gone
                Err(_) => break,
            },
        };

        if stop.is_stopped() {
            break;
        }

        trace!("To peer: {:?}", data);
        let result = writer
            .write_all(data.as_bytes())
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => {
                metrics::counter!(metric_defs::BYTES_WRITTEN.name).increment(data.len() as u64);
            }
            Err(e) => {
                if stop.is_stopped() {
                    debug!("Write interrupted by stop: {}", e);
                } else {
                    warn!("Write to peer failed: {}", e);
                    let _ = faults.send(IoFailure::new(Component::Writer, e));
                }
                break;
            }
        }
    }
    debug!("Writer thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// A writer that appends into shared memory.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }

        fn wait_for_len(&self, len: usize) -> String {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.0.lock().len() < len && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            self.contents()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A writer that always fails.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_in_enqueue_order_across_threads() {
        let buf = SharedBuf::default();
        let (faults, _fault_rx) = unbounded();
        let channel = WriterChannel::spawn(Box::new(buf.clone()), StopToken::new(), faults).unwrap();

        // Each caller finishes enqueuing before the next one starts
        for part in ["A", "B", "C"] {
            let handle = channel.handle();
            thread::spawn(move || handle.send(part).unwrap())
                .join()
                .unwrap();
        }

        assert_eq!(buf.wait_for_len(3), "ABC");
        channel.stop();
        channel.join();
    }

    #[test]
    fn test_strings_are_not_interleaved() {
        let buf = SharedBuf::default();
        let (faults, _fault_rx) = unbounded();
        let channel = WriterChannel::spawn(Box::new(buf.clone()), StopToken::new(), faults).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let handle = channel.handle();
                thread::spawn(move || {
                    for _ in 0..25 {
                        handle.send(format!("<{}{}{}>", i, i, i)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let out = buf.wait_for_len(100 * 5);
        for chunk in out.as_bytes().chunks(5) {
            assert_eq!(chunk[0], b'<');
            assert_eq!(chunk[1], chunk[2]);
            assert_eq!(chunk[2], chunk[3]);
            assert_eq!(chunk[4], b'>');
        }
        channel.stop();
        channel.join();
    }

    #[test]
    fn test_write_failure_reported_once() {
        let (faults, fault_rx) = unbounded();
        let channel = WriterChannel::spawn(Box::new(BrokenPipe), StopToken::new(), faults).unwrap();
        let handle = channel.handle();
        handle.send("one").unwrap();

        let failure = fault_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(failure.component, Component::Writer);

        channel.join();
        // The thread is gone, so the second string is refused
        assert_eq!(handle.send("two"), Err(WriterClosed));
        assert!(fault_rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_discards_queue_without_reporting() {
        let stop = StopToken::new();
        stop.stop();
        let (faults, fault_rx) = unbounded();
        let channel = WriterChannel::spawn(Box::new(BrokenPipe), stop, faults).unwrap();
        let _ = channel.handle().send("ignored");

        channel.join();
        assert!(fault_rx.try_recv().is_err());
    }
}
