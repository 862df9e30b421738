//! Host event-loop integration.
//!
//! The host registers the doorbell's read fd as a level-triggered readable
//! callback and calls [`EventLoopBridge::on_wakeup`] from it. This is the
//! only path by which queued worker requests execute while the owner thread
//! is otherwise idle inside the host's own event loop. Hosts without a
//! reactor run the explicit polling fallback instead: the owner thread calls
//! [`EventLoopBridge::drain_pending`] periodically.

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// Bridge between the dispatch channel and the host's cooperative event loop.
pub struct EventLoopBridge<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> EventLoopBridge<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// The wakeup fd to register with the host reactor (read end of the
    /// doorbell, non-blocking, level-triggered readable).
    #[cfg(unix)]
    #[must_use]
    pub fn wakeup_fd(&self) -> std::os::unix::io::RawFd {
        self.dispatcher.channel().wakeup_fd()
    }

    /// Reactor callback body: drain the doorbell, then execute queued
    /// requests until the channel is empty. Never blocks. Returns the number
    /// of requests served.
    pub fn on_wakeup(&self) -> Result<usize> {
        if !self.dispatcher.state().is_initialized() {
            return Err(Error::NotInitialized);
        }
        if !self.dispatcher.state().on_owner_thread() {
            return Err(Error::WrongThread);
        }
        let served = self.dispatcher.drain_owner_queue();
        if served > 0 {
            tracing::debug!(
                target: "evalbridge.bridge",
                event = "bridge.wakeup",
                served,
                "event-loop wakeup drained queued requests"
            );
        }
        Ok(served)
    }

    /// Polling fallback for hosts without a reactor: identical to
    /// [`on_wakeup`](Self::on_wakeup), named for its contract — the owner
    /// thread must call it periodically.
    pub fn drain_pending(&self) -> Result<usize> {
        self.on_wakeup()
    }
}
