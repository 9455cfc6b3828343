use async_trait::async_trait;
use serde_json::Value;

use crate::error::KernelError;
use crate::policy::RunPolicy;
use crate::types::{
    BridgeId, Bundle, BundleId, KernelPromiseId, KernelStats, MailboxMessage, ObjectRef,
    PromiseStatus,
};

/// The only surface the host uses to touch kernel internals.
///
/// Enqueue operations never execute anything; execution happens in `run`.
/// Promise queries take `&self` while `run` takes `&mut self`, so a query can
/// only be made while the kernel is idle.
#[async_trait]
pub trait KernelController: Send {
    /// Drive the dispatch loop until the run-queue is empty or `policy` asks
    /// to stop. Returns the number of cranks executed.
    async fn run(&mut self, policy: &mut dyn RunPolicy) -> Result<u64, KernelError>;

    fn queue_to_vat_root(
        &mut self,
        vat_name: &str,
        method: &str,
        args: Value,
    ) -> Result<KernelPromiseId, KernelError>;

    fn queue_to_vat_object(
        &mut self,
        target: &ObjectRef,
        method: &str,
        args: Value,
    ) -> Result<KernelPromiseId, KernelError>;

    fn kp_status(&self, kpid: &KernelPromiseId) -> Result<PromiseStatus, KernelError>;

    /// Settled value of a fulfilled or rejected promise.
    fn kp_resolution(&self, kpid: &KernelPromiseId) -> Result<Value, KernelError>;

    async fn validate_and_install_bundle(
        &mut self,
        bundle: &Bundle,
    ) -> Result<BundleId, KernelError>;

    /// Append a record to the structured slog. Never fails.
    fn write_slog_object(&mut self, record: Value);

    fn get_stats(&self) -> KernelStats;

    /// Tell the timer device the current chain time. Returns whether any
    /// wakeups were pushed onto the run-queue.
    fn poll_timer(&mut self, now: u64) -> bool;

    /// Hand inbound mailbox traffic to the mailbox device. Returns whether
    /// anything new was accepted.
    fn deliver_mailbox(
        &mut self,
        peer: &str,
        messages: &[MailboxMessage],
        ack: u64,
    ) -> Result<bool, KernelError>;

    /// Push a bridge event onto the run-queue for its handler vat.
    fn deliver_bridge(&mut self, bridge: BridgeId, body: Value) -> Result<(), KernelError>;

    async fn shutdown(&mut self) -> Result<(), KernelError>;
}
