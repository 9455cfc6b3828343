//! Devices the kernel exposes to the host: timer, mailbox and bridge.

mod bridge;
mod mailbox;
mod timer;

pub use bridge::{BridgeDevice, BridgeOutbound};
pub use mailbox::{MailboxDevice, MailboxStorage, PeerMailbox};
pub use timer::{TimerDevice, TimerHeap, WakeupEntry};
