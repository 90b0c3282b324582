//! Timer heap.
//!
//! Min-heap by deadline. A repeating timer reschedules itself when it
//! fires. The engine asks for the next deadline to bound its sleep and
//! pops everything due after waking.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

/// What a timer drives when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Once a second: registration deadlines, ping probes, throttle release.
    Maintenance,
    /// Expire X-lines past their deadline.
    XLineSweep,
    /// Flush the X-line database when dirty.
    XLineFlush,
    /// Flush the permanent-channel database when enabled.
    ChannelDbFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    at: Instant,
    seq: u64,
    kind: TimerKind,
    repeat: Option<Duration>,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The heap.
#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` after `delay`; with `repeat` it reschedules itself.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration, repeat: Option<Duration>) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            at: Instant::now() + delay,
            seq: self.seq,
            kind,
            repeat,
        }));
    }

    /// The next deadline, for the engine's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Pop every due timer, rescheduling the repeating ones.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek().copied() {
            if entry.at > now {
                break;
            }
            self.heap.pop();
            due.push(entry.kind);
            if let Some(period) = entry.repeat {
                self.seq += 1;
                self.heap.push(Reverse(Entry {
                    at: now + period,
                    seq: self.seq,
                    kind: entry.kind,
                    repeat: entry.repeat,
                }));
            }
        }
        due
    }
}
