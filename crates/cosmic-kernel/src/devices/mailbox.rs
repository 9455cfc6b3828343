//! Mailbox device.
//!
//! Each peer has an outbox of numbered messages and an inbound ack. Inbound
//! deliveries are deduplicated by message number, and an inbound ack prunes
//! every outbox message it covers. Peer state is written through to an
//! optional [`MailboxStorage`] whenever it changes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::MailboxMessage;

/// Persistent state of one peer's mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMailbox {
    /// Messages waiting for the peer to acknowledge them.
    pub outbox: Vec<MailboxMessage>,
    /// Highest inbound message number accepted from the peer.
    pub inbound_ack: u64,
    /// Number assigned to the next outbound message.
    pub next_outbound: u64,
}

impl PeerMailbox {
    fn new() -> Self {
        Self {
            outbox: Vec::new(),
            inbound_ack: 0,
            next_outbound: 1,
        }
    }
}

/// Sink receiving mailbox state after each change.
pub trait MailboxStorage: Send {
    fn write(&mut self, peer: &str, state: &PeerMailbox);
}

#[derive(Default)]
pub struct MailboxDevice {
    peers: BTreeMap<String, PeerMailbox>,
    storage: Option<Box<dyn MailboxStorage>>,
}

impl fmt::Debug for MailboxDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxDevice")
            .field("peers", &self.peers)
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

impl MailboxDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: Box<dyn MailboxStorage>) -> Self {
        Self {
            peers: BTreeMap::new(),
            storage: Some(storage),
        }
    }

    /// Accept inbound traffic from `peer`.
    ///
    /// Returns the messages not seen before (in number order) and whether
    /// anything changed, counting a pruning ack as a change.
    pub fn deliver_inbound(
        &mut self,
        peer: &str,
        messages: &[MailboxMessage],
        ack: u64,
    ) -> (Vec<MailboxMessage>, bool) {
        let state = self
            .peers
            .entry(peer.to_string())
            .or_insert_with(PeerMailbox::new);

        let before = state.outbox.len();
        state.outbox.retain(|(num, _)| *num > ack);
        let pruned = state.outbox.len() != before;

        let mut fresh: Vec<MailboxMessage> = messages
            .iter()
            .filter(|(num, _)| *num > state.inbound_ack)
            .cloned()
            .collect();
        fresh.sort_by_key(|(num, _)| *num);
        fresh.dedup_by_key(|(num, _)| *num);
        if let Some((last, _)) = fresh.last() {
            state.inbound_ack = *last;
        }

        let changed = pruned || !fresh.is_empty();
        if changed {
            log::debug!(
                "mailbox {peer}: accepted {} message(s), ack {ack}",
                fresh.len()
            );
            self.persist(peer);
        }
        (fresh, changed)
    }

    /// Append a message to `peer`'s outbox and return its number.
    pub fn add_outbound(&mut self, peer: &str, body: String) -> u64 {
        let state = self
            .peers
            .entry(peer.to_string())
            .or_insert_with(PeerMailbox::new);
        let num = state.next_outbound;
        state.next_outbound += 1;
        state.outbox.push((num, body));
        self.persist(peer);
        num
    }

    pub fn peer(&self, peer: &str) -> Option<&PeerMailbox> {
        self.peers.get(peer)
    }

    fn persist(&mut self, peer: &str) {
        if let (Some(storage), Some(state)) = (self.storage.as_mut(), self.peers.get(peer)) {
            storage.write(peer, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(String, PeerMailbox)>>>);

    impl MailboxStorage for Recorder {
        fn write(&mut self, peer: &str, state: &PeerMailbox) {
            self.0.lock().unwrap().push((peer.to_string(), state.clone()));
        }
    }

    fn msg(num: u64, body: &str) -> MailboxMessage {
        (num, body.to_string())
    }

    #[test]
    fn duplicate_inbound_messages_are_dropped() {
        let mut mailbox = MailboxDevice::new();
        let (fresh, changed) = mailbox.deliver_inbound("peer1", &[msg(1, "a"), msg(2, "b")], 0);
        assert!(changed);
        assert_eq!(fresh, vec![msg(1, "a"), msg(2, "b")]);

        let (fresh, changed) = mailbox.deliver_inbound("peer1", &[msg(2, "b"), msg(3, "c")], 0);
        assert!(changed);
        assert_eq!(fresh, vec![msg(3, "c")]);
        assert_eq!(mailbox.peer("peer1").unwrap().inbound_ack, 3);

        let (fresh, changed) = mailbox.deliver_inbound("peer1", &[msg(3, "c")], 0);
        assert!(!changed);
        assert!(fresh.is_empty());
    }

    #[test]
    fn ack_prunes_outbox_and_counts_as_change() {
        let mut mailbox = MailboxDevice::new();
        assert_eq!(mailbox.add_outbound("peer1", "x".into()), 1);
        assert_eq!(mailbox.add_outbound("peer1", "y".into()), 2);

        let (fresh, changed) = mailbox.deliver_inbound("peer1", &[], 1);
        assert!(fresh.is_empty());
        assert!(changed);
        assert_eq!(mailbox.peer("peer1").unwrap().outbox, vec![msg(2, "y")]);
    }

    #[test]
    fn changes_are_written_through() {
        let recorder = Recorder::default();
        let mut mailbox = MailboxDevice::with_storage(Box::new(recorder.clone()));
        mailbox.add_outbound("peer1", "x".into());
        mailbox.deliver_inbound("peer1", &[msg(1, "in")], 0);
        mailbox.deliver_inbound("peer1", &[msg(1, "in")], 0);

        let writes = recorder.0.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].1.inbound_ack, 1);
        assert_eq!(writes[1].1.outbox, vec![msg(1, "x")]);
    }
}
