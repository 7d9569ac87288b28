//! Sources of outbound messages.
//!
//! A [`MessageSource`] pushes [`MessageUnit`]s to a [`MessageListener`] on its
//! own thread. Two sources are provided:
//!
//! | Source | Emits |
//! |---|---|
//! | [`ReadStoreSource`] | messages that appear in an inbox store after start-up and are marked read |
//! | [`NewArrivalSource`] | every message body that arrives on a feed |

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use modemsim_at_protocol::MessageUnit;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::StopToken;
use crate::config::{SourceConfig, SourceKind};
use crate::error::{LinkError, LinkResult};

// ============================================================================
// Listener
// ============================================================================

/// Receiving end registration for a [`MessageSource`].
#[derive(Debug, Clone)]
pub struct MessageListener {
    tx: Sender<MessageUnit>,
}

impl MessageListener {
    /// Create a listener and the receiver its messages arrive on.
    pub fn channel() -> (MessageListener, Receiver<MessageUnit>) {
        let (tx, rx) = unbounded();
        (MessageListener { tx }, rx)
    }

    /// Deliver a message. Returns `false` once the receiver is gone.
    pub fn deliver(&self, message: MessageUnit) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Produces outbound messages over time.
pub trait MessageSource: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Start pushing messages to `listener`.
    ///
    /// A source serves one listener for its whole life.
    fn subscribe(&mut self, listener: MessageListener) -> LinkResult<()>;

    /// Stop producing and drop the listener. Idempotent.
    fn stop(&mut self);
}

fn join_source_thread(name: &str, thread: Option<JoinHandle<()>>) {
    if let Some(thread) = thread {
        if thread.join().is_err() {
            warn!("{} source thread panicked", name);
        }
    }
}

// ============================================================================
// Read store
// ============================================================================

/// One message in an inbox store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-assigned id, increasing with arrival.
    pub id: i64,
    /// Whether the user has read the message.
    #[serde(default)]
    pub read: bool,
    /// Message text.
    pub body: String,
}

/// Read access to an inbox.
pub trait MessageStore: Send {
    /// Load every message currently in the store.
    fn load(&self) -> LinkResult<Vec<StoredMessage>>;
}

/// An inbox kept as a JSON-lines file, one [`StoredMessage`] per line.
///
/// A missing file is an empty inbox.
#[derive(Debug, Clone)]
pub struct JsonLinesInbox {
    path: PathBuf,
}

impl JsonLinesInbox {
    /// Open the inbox at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonLinesInbox { path: path.into() }
    }

    /// Path of the inbox file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageStore for JsonLinesInbox {
    fn load(&self) -> LinkResult<Vec<StoredMessage>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    LinkError::Source(format!("{}:{}: {}", self.path.display(), n + 1, e))
                })
            })
            .collect()
    }
}

/// Tracks which stored messages have been emitted.
#[derive(Debug, Clone)]
struct ReadWatermark {
    /// Highest id present at start-up; older messages are never emitted.
    max_id: i64,
    seen: HashSet<i64>,
}

impl ReadWatermark {
    fn new(existing: &[StoredMessage]) -> Self {
        ReadWatermark {
            max_id: existing.iter().map(|m| m.id).max().unwrap_or(i64::MIN),
            seen: HashSet::new(),
        }
    }

    /// Messages newer than the watermark, read, and not emitted before.
    fn scan(&mut self, messages: &[StoredMessage]) -> Vec<MessageUnit> {
        messages
            .iter()
            .filter(|m| m.id > self.max_id && m.read)
            .filter(|m| self.seen.insert(m.id))
            .map(|m| MessageUnit::new(m.body.as_str()))
            .collect()
    }
}

/// Emits messages that reach the inbox after start-up once they are read.
pub struct ReadStoreSource {
    store: Option<Box<dyn MessageStore>>,
    watermark: Option<ReadWatermark>,
    poll_interval: Duration,
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl ReadStoreSource {
    /// Open the source, recording the newest message already in `store`.
    pub fn open(store: Box<dyn MessageStore>, poll_interval: Duration) -> LinkResult<Self> {
        let existing = store.load()?;
        let watermark = ReadWatermark::new(&existing);
        debug!(
            "Read store holds {} messages, watching for ids above {}",
            existing.len(),
            watermark.max_id
        );
        Ok(ReadStoreSource {
            store: Some(store),
            watermark: Some(watermark),
            poll_interval,
            stop: StopToken::new(),
            thread: None,
        })
    }
}

impl MessageSource for ReadStoreSource {
    fn name(&self) -> &'static str {
        "read_store"
    }

    fn subscribe(&mut self, listener: MessageListener) -> LinkResult<()> {
        let (Some(store), Some(mut watermark)) = (self.store.take(), self.watermark.take()) else {
            return Err(LinkError::Source("read store source already subscribed".into()));
        };
        let stop = self.stop.clone();
        let interval = self.poll_interval;

        let thread = thread::Builder::new()
            .name("modemsim-read-store".to_string())
            .spawn(move || {
                while !stop.sleep(interval) {
                    let messages = match store.load() {
                        Ok(messages) => messages,
                        Err(e) => {
                            warn!("Failed to poll read store: {}", e);
                            continue;
                        }
                    };
                    for message in watermark.scan(&messages) {
                        if !listener.deliver(message) {
                            debug!("Listener gone, read store source exiting");
                            return;
                        }
                    }
                }
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.stop();
        join_source_thread(self.name(), self.thread.take());
    }
}

// ============================================================================
// New arrivals
// ============================================================================

/// Relays every message body arriving on a feed.
pub struct NewArrivalSource {
    arrivals: Option<Receiver<String>>,
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl NewArrivalSource {
    /// Create a source fed by `arrivals`.
    pub fn new(arrivals: Receiver<String>) -> Self {
        NewArrivalSource {
            arrivals: Some(arrivals),
            stop: StopToken::new(),
            thread: None,
        }
    }
}

impl MessageSource for NewArrivalSource {
    fn name(&self) -> &'static str {
        "new_arrival"
    }

    fn subscribe(&mut self, listener: MessageListener) -> LinkResult<()> {
        let arrivals = self
            .arrivals
            .take()
            .ok_or_else(|| LinkError::Source("new arrival source already subscribed".into()))?;
        let stop = self.stop.clone();

        let thread = thread::Builder::new()
            .name("modemsim-new-arrival".to_string())
            .spawn(move || loop {
                select! {
                    recv(stop.signal()) -> _ => break,
                    recv(arrivals) -> body => match body {
                        Ok(body) => {
                            debug!("New message arrived ({} chars)", body.chars().count());
                            if !listener.deliver(MessageUnit::new(body)) {
                                break;
                            }
                        }
                        Err(_) => {
                            info!("Arrival feed closed");
                            break;
                        }
                    },
                }
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.stop();
        join_source_thread(self.name(), self.thread.take());
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Build the source selected by `config`.
///
/// `arrivals` feeds a [`NewArrivalSource`] and is required for that kind.
pub fn build_source(
    config: &SourceConfig,
    arrivals: Option<Receiver<String>>,
) -> LinkResult<Box<dyn MessageSource>> {
    match config.kind {
        SourceKind::ReadStore => {
            let path = config.inbox_path.as_ref().ok_or_else(|| {
                LinkError::Source("read_store source needs an inbox_path".into())
            })?;
            let store = JsonLinesInbox::new(path);
            let source = ReadStoreSource::open(Box::new(store), config.poll_interval())?;
            Ok(Box::new(source))
        }
        SourceKind::NewArrival => {
            let arrivals = arrivals.ok_or_else(|| {
                LinkError::Source("new_arrival source needs an arrival feed".into())
            })?;
            Ok(Box::new(NewArrivalSource::new(arrivals)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// An in-memory store the test can append to.
    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Mutex<Vec<StoredMessage>>>);

    impl MemoryStore {
        fn push(&self, id: i64, read: bool, body: &str) {
            self.0.lock().push(StoredMessage {
                id,
                read,
                body: body.to_string(),
            });
        }

        fn mark_read(&self, id: i64) {
            for m in self.0.lock().iter_mut().filter(|m| m.id == id) {
                m.read = true;
            }
        }
    }

    impl MessageStore for MemoryStore {
        fn load(&self) -> LinkResult<Vec<StoredMessage>> {
            Ok(self.0.lock().clone())
        }
    }

    fn stored(id: i64, read: bool, body: &str) -> StoredMessage {
        StoredMessage {
            id,
            read,
            body: body.to_string(),
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_watermark_skips_existing_and_unread() {
        let mut watermark = ReadWatermark::new(&[stored(1, true, "old"), stored(4, false, "old")]);
        let batch = vec![
            stored(4, true, "old, now read"),
            stored(5, false, "unread"),
            stored(6, true, "new"),
        ];
        let out = watermark.scan(&batch);
        assert_eq!(out, vec![MessageUnit::new("new")]);
    }

    #[test]
    fn test_watermark_emits_each_message_once() {
        let mut watermark = ReadWatermark::new(&[]);
        let batch = vec![stored(1, true, "a"), stored(2, true, "b")];
        assert_eq!(watermark.scan(&batch).len(), 2);
        assert!(watermark.scan(&batch).is_empty());
    }

    #[test]
    fn test_read_store_source_emits_when_read() {
        let store = MemoryStore::default();
        store.push(10, true, "before start");

        let mut source =
            ReadStoreSource::open(Box::new(store.clone()), Duration::from_millis(10)).unwrap();
        let (listener, rx) = MessageListener::channel();
        source.subscribe(listener).unwrap();

        store.push(11, false, "hello");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        store.mark_read(11);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), MessageUnit::new("hello"));

        source.stop();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_subscribe_twice_rejected() {
        let mut source =
            ReadStoreSource::open(Box::new(MemoryStore::default()), Duration::from_millis(10))
                .unwrap();
        source.subscribe(MessageListener::channel().0).unwrap();
        assert!(matches!(
            source.subscribe(MessageListener::channel().0),
            Err(LinkError::Source(_))
        ));
        source.stop();
    }

    #[test]
    fn test_new_arrival_source_relays_in_order() {
        let (feed, arrivals) = unbounded();
        let mut source = NewArrivalSource::new(arrivals);
        let (listener, rx) = MessageListener::channel();
        source.subscribe(listener).unwrap();

        feed.send("first".to_string()).unwrap();
        feed.send("second".to_string()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap().text(), "first");
        assert_eq!(rx.recv_timeout(WAIT).unwrap().text(), "second");

        source.stop();
        source.stop();
        assert!(feed.send("late".to_string()).is_err());
    }

    #[test]
    fn test_jsonl_inbox_load() {
        let dir = std::env::temp_dir().join(format!("modemsim-inbox-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("inbox.jsonl");
        fs::write(
            &path,
            "{\"id\":1,\"read\":true,\"body\":\"hi\"}\n\n{\"id\":2,\"body\":\"unread\"}\n",
        )
        .unwrap();

        let inbox = JsonLinesInbox::new(&path);
        assert_eq!(
            inbox.load().unwrap(),
            vec![stored(1, true, "hi"), stored(2, false, "unread")]
        );

        fs::write(&path, "not json\n").unwrap();
        assert!(matches!(inbox.load(), Err(LinkError::Source(_))));

        fs::remove_dir_all(&dir).unwrap();
        assert!(inbox.load().unwrap().is_empty());
    }

    #[test]
    fn test_build_source_requires_inputs() {
        let config = SourceConfig {
            kind: SourceKind::NewArrival,
            ..SourceConfig::default()
        };
        assert!(build_source(&config, None).is_err());
        let (_feed, arrivals) = unbounded();
        assert_eq!(build_source(&config, Some(arrivals)).unwrap().name(), "new_arrival");

        let config = SourceConfig {
            kind: SourceKind::ReadStore,
            inbox_path: None,
            ..SourceConfig::default()
        };
        assert!(build_source(&config, None).is_err());
    }
}
