//! Durable FIFO of queued chain actions.
//!
//! Layout inside the queue's own store: `head` and `tail` hold decimal
//! indices and each entry lives under its index as JSON. Entries in
//! `[head, tail)` are pending. `committedHeight` is the block whose
//! consumption was last applied.
//!
//! Pushes are durable immediately. Consumption is not: entries taken during
//! a block stay in the store until [`InboundQueue::commit_consumed`] runs at
//! COMMIT_BLOCK, so a block lost to a crash sees the same entries again.

use std::sync::{Arc, Mutex};

use cosmic_store::{HostStorage, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::QueueEntry;

const HEAD_KEY: &str = "head";
const TAIL_KEY: &str = "tail";
const COMMITTED_HEIGHT_KEY: &str = "committedHeight";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("queue entry encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt queue: {0}")]
    Corrupt(String),
}

/// Consumption of one block, recorded in the host store at COMMIT_BLOCK so
/// that a queue store which missed its own commit can be rolled forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedMarker {
    pub block_height: u64,
    pub head: u64,
}

#[derive(Clone)]
pub struct InboundQueue {
    store: Arc<dyn HostStorage>,
    /// Head after this block's consumption, not yet written to the store.
    pending_head: Arc<Mutex<Option<u64>>>,
}

impl std::fmt::Debug for InboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundQueue")
            .field("pending_head", &*self.pending_head.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl InboundQueue {
    pub fn new(store: Arc<dyn HostStorage>) -> Self {
        Self {
            store,
            pending_head: Arc::new(Mutex::new(None)),
        }
    }

    /// Append an entry and commit it.
    pub fn push(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let tail = read_index(self.store.as_ref(), TAIL_KEY)?;
        let encoded = serde_json::to_string(entry)?;
        self.store.set(&tail.to_string(), &encoded)?;
        self.store.set(TAIL_KEY, &(tail + 1).to_string())?;
        self.store.commit()?;
        Ok(())
    }

    /// Entries not yet consumed, counting consumption still pending commit.
    pub fn size(&self) -> Result<u64, QueueError> {
        let head = self.effective_head()?;
        let tail = read_index(self.store.as_ref(), TAIL_KEY)?;
        Ok(tail.saturating_sub(head))
    }

    /// Lazily consume pending entries in order.
    ///
    /// Yielded entries are marked consumed in memory only; dropping the
    /// iterator early keeps the unread entries for the next call.
    pub fn consume_all(&self) -> Result<Consume, QueueError> {
        let head = self.effective_head()?;
        let tail = read_index(self.store.as_ref(), TAIL_KEY)?;
        Ok(Consume {
            pending_head: self.pending_head.clone(),
            store: self.store.clone(),
            head,
            tail,
            done: false,
        })
    }

    /// Marker for the consumption made since the last commit, if any.
    pub fn pending_marker(&self, block_height: u64) -> Option<ConsumedMarker> {
        let head = *self.pending_head.lock().unwrap();
        head.map(|head| ConsumedMarker { block_height, head })
    }

    /// Delete the entries consumed since the last commit and commit the
    /// queue store.
    pub fn commit_consumed(&self, block_height: u64) -> Result<(), QueueError> {
        let Some(head) = *self.pending_head.lock().unwrap() else {
            return Ok(());
        };
        self.apply(ConsumedMarker { block_height, head })?;
        *self.pending_head.lock().unwrap() = None;
        Ok(())
    }

    /// Apply a marker the host store committed but this queue store never
    /// saw. Markers already applied are ignored.
    pub fn roll_forward(&self, marker: ConsumedMarker) -> Result<bool, QueueError> {
        let applied = read_index(self.store.as_ref(), COMMITTED_HEIGHT_KEY)?;
        if applied >= marker.block_height {
            return Ok(false);
        }
        self.apply(marker)?;
        Ok(true)
    }

    fn apply(&self, marker: ConsumedMarker) -> Result<(), QueueError> {
        let store = self.store.as_ref();
        let head = read_index(store, HEAD_KEY)?;
        let tail = read_index(store, TAIL_KEY)?;
        for index in head..marker.head.min(tail) {
            store.delete(&index.to_string())?;
        }
        if marker.head >= tail {
            store.delete(HEAD_KEY)?;
            store.delete(TAIL_KEY)?;
        } else {
            store.set(HEAD_KEY, &marker.head.to_string())?;
        }
        store.set(COMMITTED_HEIGHT_KEY, &marker.block_height.to_string())?;
        store.commit()?;
        Ok(())
    }

    fn effective_head(&self) -> Result<u64, QueueError> {
        match *self.pending_head.lock().unwrap() {
            Some(head) => Ok(head),
            None => read_index(self.store.as_ref(), HEAD_KEY),
        }
    }
}

fn read_index(store: &dyn HostStorage, key: &str) -> Result<u64, QueueError> {
    match store.get(key)? {
        Some(raw) => raw
            .parse()
            .map_err(|_| QueueError::Corrupt(format!("{key} = {raw:?}"))),
        None => Ok(0),
    }
}

pub struct Consume {
    pending_head: Arc<Mutex<Option<u64>>>,
    store: Arc<dyn HostStorage>,
    head: u64,
    tail: u64,
    done: bool,
}

impl Consume {
    fn take_next(&mut self) -> Result<Option<QueueEntry>, QueueError> {
        if self.head >= self.tail {
            return Ok(None);
        }
        let key = self.head.to_string();
        let raw = self
            .store
            .get(&key)?
            .ok_or_else(|| QueueError::Corrupt(format!("entry {key} missing")))?;
        let entry = serde_json::from_str(&raw)?;
        self.head += 1;
        *self.pending_head.lock().unwrap() = Some(self.head);
        Ok(Some(entry))
    }
}

impl Iterator for Consume {
    type Item = Result<QueueEntry, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.take_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                // The failed entry and everything after it stay pending.
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cosmic_store::{KvStore, MemHostStore};
    use serde_json::json;

    use super::*;
    use crate::action::{Action, InboundContext};

    fn entry(n: u64) -> QueueEntry {
        QueueEntry {
            action: Action::bridge("CORE_EVAL", json!({ "n": n })).unwrap(),
            context: InboundContext {
                block_height: 1,
                tx_hash: format!("tx{n}"),
                msg_idx: 0,
            },
        }
    }

    fn queue() -> (MemHostStore, InboundQueue) {
        let store = MemHostStore::new();
        let queue = InboundQueue::new(Arc::new(store.clone()));
        (store, queue)
    }

    fn drain(queue: &InboundQueue) -> Vec<String> {
        queue
            .consume_all()
            .unwrap()
            .map(|e| e.unwrap().context.tx_hash)
            .collect()
    }

    #[test]
    fn push_then_consume_in_order() {
        let (store, queue) = queue();
        for n in 0..3 {
            queue.push(&entry(n)).unwrap();
        }
        assert_eq!(queue.size().unwrap(), 3);

        assert_eq!(drain(&queue), ["tx0", "tx1", "tx2"]);
        assert_eq!(queue.size().unwrap(), 0);
        assert!(drain(&queue).is_empty());

        queue.commit_consumed(1).unwrap();
        assert!(!store.has("head").unwrap());
        assert!(!store.has("tail").unwrap());
        let committed = store.committed();
        assert_eq!(committed.keys().collect::<Vec<_>>(), ["committedHeight"]);
    }

    #[test]
    fn consumption_is_forgotten_without_a_commit() {
        let (store, queue) = queue();
        for n in 0..2 {
            queue.push(&entry(n)).unwrap();
        }
        assert_eq!(drain(&queue), ["tx0", "tx1"]);
        assert_eq!(queue.pending_marker(4), Some(ConsumedMarker { block_height: 4, head: 2 }));

        let reopened = InboundQueue::new(Arc::new(store.reopen()));
        assert_eq!(reopened.size().unwrap(), 2);
        assert_eq!(drain(&reopened), ["tx0", "tx1"]);
    }

    #[test]
    fn early_stop_keeps_unread_entries() {
        let (store, queue) = queue();
        for n in 0..4 {
            queue.push(&entry(n)).unwrap();
        }
        {
            let mut consume = queue.consume_all().unwrap();
            assert_eq!(consume.next().unwrap().unwrap().context.tx_hash, "tx0");
            assert_eq!(consume.next().unwrap().unwrap().context.tx_hash, "tx1");
        }
        assert_eq!(queue.size().unwrap(), 2);
        queue.commit_consumed(1).unwrap();
        assert_eq!(queue.pending_marker(1), None);

        let reopened = InboundQueue::new(Arc::new(store.reopen()));
        assert_eq!(drain(&reopened), ["tx2", "tx3"]);
    }

    #[test]
    fn pushes_after_a_partial_drain_queue_behind_leftovers() {
        let (_store, queue) = queue();
        queue.push(&entry(0)).unwrap();
        queue.push(&entry(1)).unwrap();
        drop(queue.consume_all().unwrap().next());
        queue.push(&entry(2)).unwrap();

        assert_eq!(drain(&queue), ["tx1", "tx2"]);
    }

    #[test]
    fn push_during_a_block_does_not_commit_its_consumption() {
        let (store, queue) = queue();
        queue.push(&entry(0)).unwrap();
        assert_eq!(drain(&queue), ["tx0"]);
        queue.push(&entry(1)).unwrap();

        let reopened = InboundQueue::new(Arc::new(store.reopen()));
        assert_eq!(drain(&reopened), ["tx0", "tx1"]);
    }

    #[test]
    fn roll_forward_applies_a_missed_commit_once() {
        let (store, queue) = queue();
        for n in 0..3 {
            queue.push(&entry(n)).unwrap();
        }
        let marker = ConsumedMarker {
            block_height: 7,
            head: 2,
        };
        assert!(queue.roll_forward(marker).unwrap());
        assert!(!queue.roll_forward(marker).unwrap());

        let reopened = InboundQueue::new(Arc::new(store.reopen()));
        assert_eq!(drain(&reopened), ["tx2"]);
    }

    #[test]
    fn missing_entry_is_an_error_and_stays_pending() {
        let (store, queue) = queue();
        queue.push(&entry(0)).unwrap();
        queue.push(&entry(1)).unwrap();
        store.delete("1").unwrap();

        let results: Vec<_> = queue.consume_all().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(QueueError::Corrupt(_))));
        assert_eq!(queue.size().unwrap(), 1);
    }

    #[test]
    fn corrupt_index_is_reported() {
        let (store, queue) = queue();
        store.set("tail", "nope").unwrap();
        assert!(matches!(queue.size(), Err(QueueError::Corrupt(_))));
    }
}
