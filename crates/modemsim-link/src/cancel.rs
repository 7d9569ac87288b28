//! Cooperative cancellation shared by the link's threads.
//!
//! A [`StopToken`] is a flag plus a signal channel. Threads that block on a
//! channel include [`StopToken::signal`] in their `select!`; async code
//! awaits [`StopToken::stopped`]; threads that block on I/O register a hook
//! with [`StopToken::on_stop`] that unblocks them (closing a socket).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::Notify;

type StopHook = Box<dyn FnOnce() + Send>;

/// State shared by every clone of a token.
struct StopState {
    /// Set once the token has been stopped.
    stopped: AtomicBool,
    /// Never sends; dropping it disconnects every signal receiver.
    trigger: Mutex<Option<Sender<()>>>,
    /// Hooks run once on stop.
    hooks: Mutex<Vec<StopHook>>,
    /// Wakes tasks awaiting `stopped()`.
    notify: Notify,
}

/// Cloneable stop signal.
#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
    signal: Receiver<()>,
}

impl StopToken {
    /// Create a token that has not been stopped.
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        StopToken {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                hooks: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
            signal,
        }
    }

    /// Stop the token and run its hooks.
    ///
    /// Returns `true` for the call that actually stopped it; later calls are
    /// no-ops returning `false`.
    pub fn stop(&self) -> bool {
        let trigger = self.state.trigger.lock().take();
        let Some(trigger) = trigger else {
            return false;
        };

        // The flag must be visible before hooks are drained, see on_stop
        self.state.stopped.store(true, Ordering::SeqCst);
        drop(trigger);
        self.state.notify.notify_waiters();

        let hooks = std::mem::take(&mut *self.state.hooks.lock());
        for hook in hooks {
            hook();
        }
        true
    }

    /// Check if the token has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped.
    ///
    /// Returns `true` if the sleep was cut short by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.signal.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => true,
        }
    }

    /// Receiver that becomes ready (disconnected) when the token stops.
    ///
    /// Meant for `crossbeam_channel::select!`; it never yields a message.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Resolves once the token stops.
    ///
    /// For `tokio::select!` against async I/O.
    pub async fn stopped(&self) {
        // Registered before the flag check so a concurrent stop is not missed
        let notified = self.state.notify.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    /// Run `hook` when the token stops, or right away if it already has.
    pub fn on_stop(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.state.hooks.lock();
        if self.is_stopped() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }

    /// Create a token that stops when this one does, but can also be
    /// stopped on its own.
    pub fn child(&self) -> StopToken {
        let child = StopToken::new();
        let linked = child.clone();
        self.on_stop(move || {
            linked.stop();
        });
        child
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_stop_is_idempotent() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        assert!(token.stop());
        assert!(!token.stop());
        assert!(token.is_stopped());
    }

    #[test]
    fn test_clones_share_state() {
        let token = StopToken::new();
        let clone = token.clone();
        clone.stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn test_sleep_times_out() {
        let token = StopToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_wakes_on_stop() {
        let token = StopToken::new();
        let stopper = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_hooks_run_once() {
        let token = StopToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        token.on_stop(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        token.stop();
        token.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_after_stop_runs_immediately() {
        let token = StopToken::new();
        token.stop();

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        token.on_stop(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = StopToken::new();
        let child = parent.child();
        parent.stop();
        assert!(child.is_stopped());
    }

    #[test]
    fn test_child_stops_alone() {
        let parent = StopToken::new();
        let child = parent.child();
        child.stop();
        assert!(child.is_stopped());
        assert!(!parent.is_stopped());
    }

    #[test]
    fn test_stopped_future_resolves() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let token = StopToken::new();
        let stopper = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        let woke = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), token.stopped())
                .await
                .is_ok()
        });
        assert!(woke);
        handle.join().unwrap();

        // Already stopped: resolves at once
        runtime.block_on(token.stopped());
    }

    #[test]
    fn test_signal_in_select() {
        let token = StopToken::new();
        let (_tx, rx) = crossbeam_channel::unbounded::<u32>();
        token.stop();

        let stopped = crossbeam_channel::select! {
            recv(token.signal()) -> _ => true,
            recv(rx) -> _ => false,
        };
        assert!(stopped);
    }
}
