//! Timer device: wakeups keyed by chain time.
//!
//! The device never reads a wall clock. The host reports block time through
//! `poll`, and every wakeup whose deadline has been reached is returned in
//! deadline order so the kernel can push `wake` deliveries onto its
//! run-queue.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::types::ObjectRef;

/// A pending wakeup.
#[derive(Debug, Clone)]
pub struct WakeupEntry {
    /// Absolute chain-time deadline.
    pub deliver_at: u64,
    /// Scheduling order, breaks ties between equal deadlines.
    pub seq: u64,
    pub handler: ObjectRef,
}

impl PartialEq for WakeupEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at && self.seq == other.seq
    }
}

impl Eq for WakeupEntry {}

impl PartialOrd for WakeupEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WakeupEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deliver_at
            .cmp(&other.deliver_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-heap of wakeups ordered by deadline.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<WakeupEntry>>,
}

impl TimerHeap {
    pub fn push(&mut self, entry: WakeupEntry) {
        self.heap.push(Reverse(entry));
    }

    pub fn peek(&self) -> Option<&WakeupEntry> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    pub fn pop(&mut self) -> Option<WakeupEntry> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[derive(Debug, Default)]
pub struct TimerDevice {
    heap: TimerHeap,
    next_seq: u64,
    now: u64,
}

impl TimerDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deliver_at: u64, handler: ObjectRef) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(WakeupEntry {
            deliver_at,
            seq,
            handler,
        });
    }

    /// Record the current chain time and pop every wakeup that is due.
    pub fn poll(&mut self, now: u64) -> Vec<WakeupEntry> {
        if now < self.now {
            log::warn!("timer polled with time {now} earlier than {}", self.now);
        }
        self.now = self.now.max(now);
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deliver_at > self.now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|entry| entry.deliver_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
