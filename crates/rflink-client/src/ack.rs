//! Command acknowledgment coordination.
//!
//! The gateway answers every command with `OK` or `CMD UNKNOWN` and carries
//! no correlation id, so the next response on the wire is taken to belong to
//! the most recently sent command. Commands are therefore single-flight: a
//! sender holds [`AckCoordinator::acquire`]'s guard from write until the
//! response arrives or the timeout passes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Result of a command that waited for acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The gateway answered `OK`.
    Ack,
    /// The gateway answered `CMD UNKNOWN`.
    Nack,
    /// No response before the timeout.
    Timeout,
    /// The connection closed while waiting.
    Disconnected,
}

impl CommandOutcome {
    /// Whether the gateway accepted the command.
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ack)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandOutcome::Ack => "acknowledged",
            CommandOutcome::Nack => "rejected",
            CommandOutcome::Timeout => "timed out",
            CommandOutcome::Disconnected => "disconnected",
        })
    }
}

/// Per-connection single-flight lock and ack signal.
#[derive(Debug)]
pub struct AckCoordinator {
    send_lock: Mutex<()>,
    pending: parking_lot::Mutex<Option<oneshot::Sender<bool>>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl AckCoordinator {
    pub fn new(timeout: Duration) -> Self {
        AckCoordinator {
            send_lock: Mutex::new(()),
            pending: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the right to send a command. Waiters are served in the
    /// order they called this.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.send_lock.lock().await
    }

    /// Install a fresh ack signal, discarding any stale one. Must be called
    /// before the command is written so a fast response is not missed.
    pub fn arm(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        if !self.closed.load(Ordering::Acquire) {
            *self.pending.lock() = Some(tx);
        }
        rx
    }

    /// Drop the pending signal without resolving it.
    pub fn disarm(&self) {
        self.pending.lock().take();
    }

    /// Deliver a response to the waiting sender. Returns `false` when nobody
    /// was waiting.
    pub fn resolve(&self, ok: bool) -> bool {
        match self.pending.lock().take() {
            Some(tx) => tx.send(ok).is_ok(),
            None => {
                debug!("unsolicited command response (ok: {})", ok);
                false
            }
        }
    }

    /// Release any waiter and refuse future ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait on a signal from [`arm`](Self::arm).
    pub async fn wait(&self, rx: oneshot::Receiver<bool>) -> CommandOutcome {
        debug!("waiting for acknowledgement");
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => {
                debug!("packet acknowledged");
                CommandOutcome::Ack
            }
            Ok(Ok(false)) => {
                warn!("command not recognised by gateway");
                CommandOutcome::Nack
            }
            Ok(Err(_)) => CommandOutcome::Disconnected,
            Err(_) => {
                self.disarm();
                warn!("acknowledge timeout");
                CommandOutcome::Timeout
            }
        }
    }
}
