//! Bounded, thread-safe FIFO used to hand frames between pipeline stages.
//!
//! ```text
//!   producer ──push──► [ ring of C slots ] ──pop──► consumer
//!                       head ... tail
//! ```
//!
//! Capacity is fixed at construction. A full channel blocks (or rejects)
//! the producer instead of growing, so a slow consumer turns into dropped
//! frames upstream rather than unbounded latency.

use std::{
    fmt::{Debug, Display, Formatter},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::frame::FrameUnit;

/// Capacity used when a caller asks for a zero-sized channel.
pub const DEFAULT_CAPACITY: usize = 8;

pub type FrameChannel = BoundedChannel<FrameUnit>;

/// How long `push`/`pop` may wait for space or data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    NoWait,
    After(Duration),
}

impl Timeout {
    /// Negative = forever, zero = no wait, positive = milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Timeout::Forever,
            0 => Timeout::NoWait,
            ms => Timeout::After(Duration::from_millis(ms as u64)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::NoWait
        } else {
            Timeout::After(d)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// Full (push) or empty (pop) and the caller asked not to wait.
    WouldBlock,
    /// Full (push) or empty (pop) for the whole timeout.
    TimedOut,
    /// Push: channel closed. Pop: channel closed and drained.
    Closed,
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::WouldBlock => write!(f, "channel would block"),
            ChannelError::TimedOut => write!(f, "channel wait timed out"),
            ChannelError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Failed push. Carries the rejected item back so the caller decides its fate.
pub struct PushError<T> {
    error: ChannelError,
    item: T,
}

impl<T> PushError<T> {
    pub fn error(&self) -> ChannelError {
        self.error
    }

    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> Debug for PushError<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> Display for PushError<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.error, f)
    }
}

impl<T> std::error::Error for PushError<T> {}

struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn put(&mut self, item: T) {
        debug_assert!(self.count < self.capacity());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.count += 1;
        self.check();
    }

    fn take(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.count -= 1;
        self.check();
        item
    }

    fn check(&self) {
        let c = self.capacity();
        debug_assert!(self.count <= c);
        debug_assert_eq!(self.count % c, (self.tail + c - self.head) % c);
    }
}

pub struct BoundedChannel<T> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedChannel<T> {
    /// Allocate a channel with `capacity` slots (0 falls back to
    /// [`DEFAULT_CAPACITY`]).
    pub fn new(capacity: usize) -> anyhow::Result<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| anyhow::anyhow!("allocate {} channel slots: {}", capacity, e))?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    // No code panics while holding the lock, so a poisoned ring is still
    // consistent.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `item` at the tail, waiting for space according to `timeout`.
    ///
    /// A closed channel rejects the item even if space is available.
    pub fn push(&self, item: T, timeout: Timeout) -> Result<(), PushError<T>> {
        let mut ring = self.lock();
        let deadline = match timeout {
            Timeout::After(d) => Some(Instant::now() + d),
            _ => None,
        };

        while ring.is_full() && !ring.closed {
            match timeout {
                Timeout::NoWait => {
                    return Err(PushError {
                        error: ChannelError::WouldBlock,
                        item,
                    });
                }
                Timeout::Forever => {
                    ring = self
                        .not_full
                        .wait(ring)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Timeout::After(_) => {
                    let remaining = deadline
                        .map(|d| d.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    if remaining.is_zero() {
                        return Err(PushError {
                            error: ChannelError::TimedOut,
                            item,
                        });
                    }
                    ring = self
                        .not_full
                        .wait_timeout(ring, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        if ring.closed {
            return Err(PushError {
                error: ChannelError::Closed,
                item,
            });
        }

        ring.put(item);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head item, waiting for data according to `timeout`.
    ///
    /// After `close()` queued items are still returned in order; only a
    /// closed and empty channel reports [`ChannelError::Closed`].
    pub fn pop(&self, timeout: Timeout) -> Result<T, ChannelError> {
        let mut ring = self.lock();
        let deadline = match timeout {
            Timeout::After(d) => Some(Instant::now() + d),
            _ => None,
        };

        while ring.count == 0 && !ring.closed {
            match timeout {
                Timeout::NoWait => return Err(ChannelError::WouldBlock),
                Timeout::Forever => {
                    ring = self
                        .not_empty
                        .wait(ring)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Timeout::After(_) => {
                    let remaining = deadline
                        .map(|d| d.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    if remaining.is_zero() {
                        return Err(ChannelError::TimedOut);
                    }
                    ring = self
                        .not_empty
                        .wait_timeout(ring, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        match ring.take() {
            Some(item) => {
                drop(ring);
                self.not_full.notify_one();
                Ok(item)
            }
            None => Err(ChannelError::Closed),
        }
    }

    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, Timeout::NoWait)
    }

    pub fn try_pop(&self) -> Result<T, ChannelError> {
        self.pop(Timeout::NoWait)
    }

    /// Pop everything currently queued without waiting.
    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.lock();
        let mut items = Vec::with_capacity(ring.count);
        while let Some(item) = ring.take() {
            items.push(item);
        }
        drop(ring);
        self.not_full.notify_all();
        items
    }

    /// Mark the channel closed and wake every blocked caller. Idempotent.
    pub fn close(&self) {
        let mut ring = self.lock();
        ring.closed = true;
        drop(ring);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Snapshot only; may be stale by the time it is read.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// Snapshot only; may be stale by the time it is read.
    pub fn is_empty(&self) -> bool {
        self.lock().count == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod channel_test;
