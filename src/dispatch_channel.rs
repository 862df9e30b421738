//! Thread-safe request mailbox with an event-loop doorbell.
//!
//! Senders enqueue immediately (non-blocking) and wait elsewhere on their own
//! per-request condition variable; this is what keeps worker threads from
//! deadlocking while the receiver (the runtime owner thread) is busy inside
//! the host engine. The doorbell is a coalescing one-byte notification, not a
//! data channel: a full pipe is not an error and stale bytes are drained by
//! the consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// How long a receive may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Return immediately if the queue is empty.
    NoWait,
    /// Block until an item arrives or the channel closes.
    Forever,
    /// Block up to the given duration, converted to an absolute deadline.
    After(Duration),
}

/// Lightweight diagnostics snapshot of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTelemetry {
    pub depth: usize,
    pub max_depth_seen: usize,
    pub enqueued_total: u64,
    pub closed: bool,
}

/// The FIFO state proper, lock-agnostic so tests can drive interleavings
/// with their own synchronization.
#[derive(Debug)]
pub(crate) struct RequestQueue<T> {
    items: VecDeque<T>,
    closed: bool,
    enqueued_total: u64,
    max_depth_seen: usize,
}

impl<T> RequestQueue<T> {
    pub(crate) const fn new() -> Self {
        Self {
            items: VecDeque::new(),
            closed: false,
            enqueued_total: 0,
            max_depth_seen: 0,
        }
    }

    pub(crate) fn push_back(&mut self, item: T) -> Result<usize> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        self.items.push_back(item);
        self.enqueued_total += 1;
        let depth = self.items.len();
        self.max_depth_seen = self.max_depth_seen.max(depth);
        Ok(depth)
    }

    /// FIFO dequeue. A closed-but-nonempty queue still drains normally;
    /// close means "no more sends", not "discard backlog".
    pub(crate) fn pop_front(&mut self) -> Result<Option<T>> {
        match self.items.pop_front() {
            Some(item) => Ok(Some(item)),
            None if self.closed => Err(Error::ChannelClosed),
            None => Ok(None),
        }
    }

    /// Idempotent.
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn snapshot(&self) -> ChannelTelemetry {
        ChannelTelemetry {
            depth: self.items.len(),
            max_depth_seen: self.max_depth_seen,
            enqueued_total: self.enqueued_total,
            closed: self.closed,
        }
    }
}

/// Unbounded multi-producer/single-consumer mailbox of request handles.
#[derive(Debug)]
pub struct DispatchChannel<T> {
    inner: Mutex<RequestQueue<T>>,
    not_empty: Condvar,
    doorbell: doorbell::Doorbell,
}

impl<T> DispatchChannel<T> {
    /// Create the mailbox and its doorbell.
    ///
    /// Fails only if the doorbell fd pair cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(RequestQueue::new()),
            not_empty: Condvar::new(),
            doorbell: doorbell::Doorbell::new()?,
        })
    }

    /// Non-blocking enqueue: append, signal the condvar, ring the doorbell.
    pub fn send(&self, item: T) -> Result<()> {
        let depth = {
            let mut queue = self.lock();
            queue.push_back(item)?
        };
        self.not_empty.notify_one();
        self.doorbell.ring();
        tracing::trace!(
            target: "evalbridge.channel",
            event = "channel.enqueue",
            depth,
            "request enqueued"
        );
        Ok(())
    }

    /// Dequeue FIFO, blocking per the timeout mode.
    ///
    /// `Ok(None)` means empty (for `NoWait`) or deadline reached (for
    /// `After`); `Err(ChannelClosed)` is returned only once the queue is
    /// simultaneously empty and closed.
    pub fn recv(&self, timeout: RecvTimeout) -> Result<Option<T>> {
        let deadline = match timeout {
            RecvTimeout::After(d) => Some(Instant::now() + d),
            RecvTimeout::NoWait | RecvTimeout::Forever => None,
        };
        let mut queue = self.lock();
        loop {
            match queue.pop_front()? {
                Some(item) => return Ok(Some(item)),
                None => match timeout {
                    RecvTimeout::NoWait => return Ok(None),
                    RecvTimeout::Forever => {
                        queue = self
                            .not_empty
                            .wait(queue)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    RecvTimeout::After(_) => {
                        let deadline = deadline.unwrap_or_else(Instant::now);
                        let Some(remaining) = deadline.checked_duration_since(Instant::now())
                        else {
                            return Ok(None);
                        };
                        queue = self
                            .not_empty
                            .wait_timeout(queue, remaining)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                },
            }
        }
    }

    /// `recv` with the no-wait mode.
    pub fn try_recv(&self) -> Result<Option<T>> {
        self.recv(RecvTimeout::NoWait)
    }

    /// Consumer-side doorbell drain; call around queue draining so a stale
    /// byte cannot cause a spurious extra event-loop wakeup. Returns the
    /// number of notification bytes discarded (diagnostic only).
    pub fn drain_wakeup(&self) -> usize {
        self.doorbell.drain()
    }

    /// Close the channel and release all blocked receivers. Idempotent.
    pub fn close(&self) {
        let newly_closed = self.lock().close();
        if newly_closed {
            self.not_empty.notify_all();
            tracing::debug!(
                target: "evalbridge.channel",
                event = "channel.close",
                "channel closed"
            );
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn telemetry(&self) -> ChannelTelemetry {
        self.lock().snapshot()
    }

    /// Read end of the doorbell, registrable with a level-triggered reactor.
    #[cfg(unix)]
    #[must_use]
    pub fn wakeup_fd(&self) -> std::os::unix::io::RawFd {
        self.doorbell.read_fd()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RequestQueue<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(unix)]
mod doorbell {
    //! One-byte wakeup primitive over a non-blocking socket pair.

    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;

    use crate::error::{Error, Result};

    #[derive(Debug)]
    pub(super) struct Doorbell {
        reader: UnixStream,
        writer: UnixStream,
    }

    impl Doorbell {
        pub(super) fn new() -> Result<Self> {
            let (reader, writer) =
                UnixStream::pair().map_err(|err| Error::Init(format!("doorbell pair: {err}")))?;
            for end in [&reader, &writer] {
                end.set_nonblocking(true)
                    .map_err(|err| Error::Init(format!("doorbell nonblocking: {err}")))?;
            }
            Ok(Self { reader, writer })
        }

        /// Best-effort single-byte notification. `WouldBlock` means the
        /// doorbell is already full, which coalesces with the pending ring.
        pub(super) fn ring(&self) {
            match (&self.writer).write(&[b'M']) {
                Ok(_) => {}
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "evalbridge.channel",
                        event = "doorbell.ring_failed",
                        error = %err,
                        "doorbell write failed"
                    );
                }
            }
        }

        /// Discard all pending notification bytes, returning how many.
        pub(super) fn drain(&self) -> usize {
            let mut buf = [0_u8; 64];
            let mut drained = 0;
            loop {
                match (&self.reader).read(&mut buf) {
                    Ok(0) => return drained,
                    Ok(n) => drained += n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => return drained,
                }
            }
        }

        pub(super) fn read_fd(&self) -> RawFd {
            self.reader.as_raw_fd()
        }
    }
}

#[cfg(not(unix))]
mod doorbell {
    //! Without a host event loop to integrate with, the doorbell degrades to
    //! a no-op and the owner thread must periodically call
    //! `EventLoopBridge::drain_pending` itself.

    use crate::error::Result;

    #[derive(Debug)]
    pub(super) struct Doorbell;

    impl Doorbell {
        pub(super) fn new() -> Result<Self> {
            Ok(Self)
        }

        pub(super) fn ring(&self) {}

        pub(super) fn drain(&self) -> usize {
            0
        }
    }
}
