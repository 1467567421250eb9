//! Bounded hand-off between the producer and the consumer.
//!
//! One mutex guards the sample deque. The producer wakes the consumer only
//! when the queue length reaches the high-water mark, and [`SampleQueue::wake`]
//! releases a waiting consumer at shutdown. The producer never blocks: a push
//! into a full queue drops the sample and counts an overrun.

use crate::protocol::ChannelSample;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<ChannelSample>,
    pushed: u64,
    overruns: u64,
}

/// Counters describing queue traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Samples accepted into the queue.
    pub pushed: u64,
    /// Samples dropped because the queue was full.
    pub overruns: u64,
    /// Samples currently queued.
    pub queued: usize,
}

/// Single-lock bounded sample queue with a high-water wake signal.
#[derive(Debug)]
pub struct SampleQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
    capacity: usize,
    high_water_mark: usize,
}

impl SampleQueue {
    /// Create a queue holding at most `capacity` samples that signals the
    /// consumer once `high_water_mark` samples are waiting.
    pub fn new(capacity: usize, high_water_mark: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
            ready: Condvar::new(),
            capacity,
            high_water_mark: high_water_mark.clamp(1, capacity),
        }
    }

    /// Queue length at which the consumer is woken.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Enqueue accepted samples. Returns how many were dropped for lack of
    /// space.
    pub fn push(&self, samples: &[ChannelSample]) -> usize {
        let mut inner = self.inner.lock();
        let room = self.capacity.saturating_sub(inner.samples.len());
        let taken = samples.len().min(room);
        inner.samples.extend(&samples[..taken]);
        inner.pushed += taken as u64;
        let dropped = samples.len() - taken;
        inner.overruns += dropped as u64;
        let signal = inner.samples.len() >= self.high_water_mark;
        drop(inner);

        if signal {
            self.ready.notify_one();
        }
        dropped
    }

    /// Block until the high-water mark is reached, `running` clears, or
    /// `timeout` elapses. Returns the queue length at wake-up.
    pub fn wait_ready(&self, running: &AtomicBool, timeout: Duration) -> usize {
        let mut inner = self.inner.lock();
        let hwm = self.high_water_mark;
        self.ready.wait_while_for(
            &mut inner,
            |inner| inner.samples.len() < hwm && running.load(Ordering::Acquire),
            timeout,
        );
        inner.samples.len()
    }

    /// Move every queued sample into `out`, oldest first.
    pub fn drain_into(&self, out: &mut Vec<ChannelSample>) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.samples.len();
        out.extend(inner.samples.drain(..));
        n
    }

    /// Release any waiting consumer.
    pub fn wake(&self) {
        // Taking the lock orders the wake after any in-flight predicate check.
        let _guard = self.inner.lock();
        self.ready.notify_all();
    }

    /// Drop everything queued.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.samples.len();
        inner.samples.clear();
        n
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pushed: inner.pushed,
            overruns: inner.overruns,
            queued: inner.samples.len(),
        }
    }
}
