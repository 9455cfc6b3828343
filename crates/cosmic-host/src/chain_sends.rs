//! Outbound traffic from the kernel to the chain.
//!
//! Every call the kernel makes into the chain during a block is recorded.
//! COMMIT_BLOCK persists the record under `host.chainSends`, so a restarted
//! node that is asked to re-execute an already committed block can reproduce
//! the exact same calls without running the kernel.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cosmic_kernel::{BridgeId, BridgeOutbound, MailboxStorage, PeerMailbox};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Chain endpoint receiving outbound calls.
pub trait ChainOutbound: Send + Sync {
    fn send(&self, destination: &str, message: &Value) -> Value;
}

impl<F> ChainOutbound for F
where
    F: Fn(&str, &Value) -> Value + Send + Sync,
{
    fn send(&self, destination: &str, message: &Value) -> Value {
        self(destination, message)
    }
}

/// One recorded call into the chain and its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSend {
    pub destination: String,
    pub message: Value,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayMismatch {
    pub index: usize,
    pub expected: Value,
    pub actual: Value,
}

impl std::fmt::Display for ReplayMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "replayed chain send #{} returned {} instead of {}",
            self.index, self.actual, self.expected
        )
    }
}

/// Recording wrapper around a [`ChainOutbound`]. Clones share the record.
#[derive(Clone)]
pub struct ChainSendLog {
    outbound: Arc<dyn ChainOutbound>,
    pending: Arc<Mutex<Vec<ChainSend>>>,
}

impl std::fmt::Debug for ChainSendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSendLog")
            .field("pending", &self.pending.lock().unwrap().len())
            .finish()
    }
}

impl ChainSendLog {
    pub fn new(outbound: Arc<dyn ChainOutbound>) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A log whose chain side answers `null` to everything.
    pub fn detached() -> Self {
        Self::new(Arc::new(|_: &str, _: &Value| Value::Null))
    }

    /// Forward `message` to the chain and record the exchange.
    pub fn send_to_chain(&self, destination: &str, message: Value) -> Value {
        let result = self.outbound.send(destination, &message);
        self.pending.lock().unwrap().push(ChainSend {
            destination: destination.to_string(),
            message,
            result: result.clone(),
        });
        result
    }

    /// Sends recorded since the last `clear`.
    pub fn pending(&self) -> Vec<ChainSend> {
        self.pending.lock().unwrap().clone()
    }

    /// Take the record, leaving it empty.
    pub fn clear(&self) -> Vec<ChainSend> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    /// Re-send `saved` in order, recording each exchange again. Any answer
    /// that differs from the saved one stops the replay.
    pub fn replay(&self, saved: &[ChainSend]) -> Result<(), ReplayMismatch> {
        for (index, send) in saved.iter().enumerate() {
            let actual = self.send_to_chain(&send.destination, send.message.clone());
            if actual != send.result {
                return Err(ReplayMismatch {
                    index,
                    expected: send.result.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl BridgeOutbound for ChainSendLog {
    fn send(&mut self, bridge: BridgeId, message: &Value) -> Value {
        self.send_to_chain(bridge.as_str(), message.clone())
    }
}

/// Chain-side state written at END_BLOCK.
#[async_trait]
pub trait ChainStorage: Send + Sync {
    async fn commit(&self) -> anyhow::Result<()>;
}

/// Chain storage that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChainStorage;

#[async_trait]
impl ChainStorage for NoChainStorage {
    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub const MAILBOX_DESTINATION: &str = "mailbox";

/// Buffers mailbox changes from the kernel and writes them to the chain as
/// `setMailbox` sends when committed.
#[derive(Clone)]
pub struct MailboxChainStorage {
    dirty: Arc<Mutex<BTreeMap<String, PeerMailbox>>>,
    chain: ChainSendLog,
}

impl MailboxChainStorage {
    pub fn new(chain: ChainSendLog) -> Self {
        Self {
            dirty: Arc::new(Mutex::new(BTreeMap::new())),
            chain,
        }
    }

    pub fn dirty_peers(&self) -> Vec<String> {
        self.dirty.lock().unwrap().keys().cloned().collect()
    }
}

impl MailboxStorage for MailboxChainStorage {
    fn write(&mut self, peer: &str, state: &PeerMailbox) {
        self.dirty
            .lock()
            .unwrap()
            .insert(peer.to_string(), state.clone());
    }
}

#[async_trait]
impl ChainStorage for MailboxChainStorage {
    async fn commit(&self) -> anyhow::Result<()> {
        let dirty = std::mem::take(&mut *self.dirty.lock().unwrap());
        for (peer, state) in dirty {
            self.chain.send_to_chain(
                MAILBOX_DESTINATION,
                json!({
                    "method": "setMailbox",
                    "peer": peer,
                    "outbox": state.outbox,
                    "ack": state.inbound_ack,
                }),
            );
        }
        Ok(())
    }
}
