//! Vats as seen by the reference kernel: a delivery handler plus the context
//! it may act through during one crank.

use std::fmt;

use serde_json::Value;

use crate::devices::{BridgeDevice, MailboxDevice};
use crate::types::{BridgeId, ObjectRef};

/// Fault raised by a vat delivery.
///
/// An ordinary fault rejects the result promise and is charged as a failed
/// crank. A fatal fault aborts the whole `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatFault {
    pub message: String,
    pub fatal: bool,
}

impl VatFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl fmt::Display for VatFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub trait Vat: Send {
    fn deliver(
        &mut self,
        ctx: &mut VatContext<'_>,
        target: &ObjectRef,
        method: &str,
        args: &Value,
    ) -> Result<Value, VatFault>;
}

impl<F> Vat for F
where
    F: FnMut(&mut VatContext<'_>, &ObjectRef, &str, &Value) -> Result<Value, VatFault> + Send,
{
    fn deliver(
        &mut self,
        ctx: &mut VatContext<'_>,
        target: &ObjectRef,
        method: &str,
        args: &Value,
    ) -> Result<Value, VatFault> {
        self(ctx, target, method, args)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingSend {
    pub(crate) target: ObjectRef,
    pub(crate) method: String,
    pub(crate) args: Value,
}

/// Capabilities available to a vat for the duration of one delivery.
///
/// Sends and wakeups are buffered and applied by the kernel once the
/// delivery returns successfully; a faulting delivery drops them. Bridge and
/// mailbox calls take effect immediately.
pub struct VatContext<'a> {
    vat_name: &'a str,
    now: u64,
    next_object: &'a mut u64,
    bridge: &'a mut BridgeDevice,
    mailbox: &'a mut MailboxDevice,
    pub(crate) sends: Vec<PendingSend>,
    pub(crate) wakeups: Vec<(u64, ObjectRef)>,
    pub(crate) computrons: u64,
}

impl<'a> VatContext<'a> {
    pub(crate) fn new(
        vat_name: &'a str,
        now: u64,
        next_object: &'a mut u64,
        bridge: &'a mut BridgeDevice,
        mailbox: &'a mut MailboxDevice,
    ) -> Self {
        Self {
            vat_name,
            now,
            next_object,
            bridge,
            mailbox,
            sends: Vec::new(),
            wakeups: Vec::new(),
            computrons: 0,
        }
    }

    pub fn vat_name(&self) -> &str {
        self.vat_name
    }

    /// Chain time last reported to the timer device.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Queue a message to another object; delivered in a later crank.
    pub fn send(&mut self, target: ObjectRef, method: impl Into<String>, args: Value) {
        self.sends.push(PendingSend {
            target,
            method: method.into(),
            args,
        });
    }

    /// Add metered work on top of the base delivery cost.
    pub fn charge(&mut self, computrons: u64) {
        self.computrons = self.computrons.saturating_add(computrons);
    }

    /// Allocate a fresh object owned by this vat.
    pub fn export_object(&mut self) -> ObjectRef {
        *self.next_object += 1;
        ObjectRef::new(self.vat_name, *self.next_object)
    }

    /// Ask the timer device to send `wake(deadline)` to `handler` once the
    /// chain time reaches `deadline`.
    pub fn set_wakeup(&mut self, deadline: u64, handler: ObjectRef) {
        self.wakeups.push((deadline, handler));
    }

    /// Synchronous outbound call across a bridge to the chain.
    pub fn bridge_send(&mut self, bridge: BridgeId, message: &Value) -> Value {
        self.bridge.send_outbound(bridge, message)
    }

    /// Append an outbound mailbox message for `peer`; returns its number.
    pub fn mailbox_send(&mut self, peer: &str, body: impl Into<String>) -> u64 {
        self.mailbox.add_outbound(peer, body.into())
    }
}

/// Box a closure as a vat, letting the compiler infer the delivery signature.
pub fn vat_fn<F>(deliver: F) -> Box<dyn Vat>
where
    F: FnMut(&mut VatContext<'_>, &ObjectRef, &str, &Value) -> Result<Value, VatFault>
        + Send
        + 'static,
{
    Box::new(deliver)
}
