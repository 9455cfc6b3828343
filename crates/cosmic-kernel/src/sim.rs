//! Deterministic in-memory kernel.
//!
//! `SimKernel` implements [`KernelController`] over a set of registered vats.
//! Every crank is charged a base cost plus whatever the vat charged through
//! its context, so run policies see realistic computron reports. The kernel
//! folds each crank into a running SHA-256 activity hash and reports it,
//! along with the crank number, through the export callback after every
//! `run`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::bundle::validate_bundle;
use crate::controller::KernelController;
use crate::devices::{BridgeDevice, BridgeOutbound, MailboxDevice, MailboxStorage, TimerDevice};
use crate::error::KernelError;
use crate::policy::RunPolicy;
use crate::run_queue::{Message, RunQueue, RunQueueItem};
use crate::types::{
    BridgeId, Bundle, BundleId, CrankDetails, ExportUpdate, KernelPromiseId, KernelStats,
    MailboxMessage, ObjectRef, PromiseStatus,
};
use crate::vat::{Vat, VatContext};

/// Computrons charged for every delivery before the vat's own charges.
pub const BASE_DELIVERY_COMPUTRONS: u64 = 100;

pub const CRANK_NUMBER_KEY: &str = "kernel.crankNumber";
pub const ACTIVITY_HASH_KEY: &str = "kernel.activityhash";

/// Receives kernel-state changes after each `run`.
pub type ExportCallback = Box<dyn FnMut(Vec<ExportUpdate>) + Send>;

#[derive(Debug, Clone)]
struct PromiseRecord {
    status: PromiseStatus,
    value: Value,
}

enum CrankOutcome {
    Complete(u64),
    Failed,
}

#[derive(Default)]
pub struct SimKernelBuilder {
    vats: Vec<(String, Box<dyn Vat>)>,
    mailbox_handler: Option<ObjectRef>,
    bridge_handlers: Vec<(BridgeId, ObjectRef)>,
    bridge_outbound: Option<Box<dyn BridgeOutbound>>,
    mailbox_storage: Option<Box<dyn MailboxStorage>>,
    export: Option<ExportCallback>,
    base_computrons: Option<u64>,
}

impl SimKernelBuilder {
    pub fn vat(mut self, name: impl Into<String>, vat: Box<dyn Vat>) -> Self {
        self.vats.push((name.into(), vat));
        self
    }

    /// Object receiving `deliverInboundMessages` and `deliverInboundAck`.
    pub fn mailbox_handler(mut self, handler: ObjectRef) -> Self {
        self.mailbox_handler = Some(handler);
        self
    }

    pub fn bridge_handler(mut self, bridge: BridgeId, handler: ObjectRef) -> Self {
        self.bridge_handlers.push((bridge, handler));
        self
    }

    pub fn bridge_outbound(mut self, outbound: Box<dyn BridgeOutbound>) -> Self {
        self.bridge_outbound = Some(outbound);
        self
    }

    pub fn mailbox_storage(mut self, storage: Box<dyn MailboxStorage>) -> Self {
        self.mailbox_storage = Some(storage);
        self
    }

    pub fn export_callback(mut self, callback: ExportCallback) -> Self {
        self.export = Some(callback);
        self
    }

    pub fn base_computrons(mut self, computrons: u64) -> Self {
        self.base_computrons = Some(computrons);
        self
    }

    pub fn build(self) -> Result<SimKernel, KernelError> {
        let mut vats = BTreeMap::new();
        for (name, vat) in self.vats {
            if vats.contains_key(&name) {
                return Err(KernelError::DuplicateVat(name));
            }
            vats.insert(name, vat);
        }
        let mut bridge = BridgeDevice::new();
        for (id, handler) in self.bridge_handlers {
            bridge.register_handler(id, handler);
        }
        if let Some(outbound) = self.bridge_outbound {
            bridge.set_outbound(outbound);
        }
        let mailbox = match self.mailbox_storage {
            Some(storage) => MailboxDevice::with_storage(storage),
            None => MailboxDevice::new(),
        };
        Ok(SimKernel {
            vats,
            next_objects: BTreeMap::new(),
            run_queue: RunQueue::default(),
            promises: BTreeMap::new(),
            next_promise: 1,
            bundles: BTreeMap::new(),
            timer: TimerDevice::new(),
            mailbox,
            bridge,
            mailbox_handler: self.mailbox_handler,
            slog: Vec::new(),
            crank_count: 0,
            exported_crank: 0,
            activity_hash: [0u8; 32],
            export: self.export,
            base_computrons: self.base_computrons.unwrap_or(BASE_DELIVERY_COMPUTRONS),
            shut_down: false,
        })
    }
}

pub struct SimKernel {
    vats: BTreeMap<String, Box<dyn Vat>>,
    next_objects: BTreeMap<String, u64>,
    run_queue: RunQueue,
    promises: BTreeMap<KernelPromiseId, PromiseRecord>,
    next_promise: u64,
    bundles: BTreeMap<BundleId, Bundle>,
    timer: TimerDevice,
    mailbox: MailboxDevice,
    bridge: BridgeDevice,
    mailbox_handler: Option<ObjectRef>,
    slog: Vec<Value>,
    crank_count: u64,
    exported_crank: u64,
    activity_hash: [u8; 32],
    export: Option<ExportCallback>,
    base_computrons: u64,
    shut_down: bool,
}

impl fmt::Debug for SimKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimKernel")
            .field("vats", &self.vats.keys().collect::<Vec<_>>())
            .field("run_queue_length", &self.run_queue.len())
            .field("crank_count", &self.crank_count)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl SimKernel {
    pub fn builder() -> SimKernelBuilder {
        SimKernelBuilder::default()
    }

    /// Ask the kernel to create a vat; it comes into existence during a
    /// later crank and is reported to the run policy via `vat_created`.
    pub fn queue_create_vat(
        &mut self,
        name: impl Into<String>,
        vat: Box<dyn Vat>,
    ) -> Result<(), KernelError> {
        let name = name.into();
        if self.vat_known(&name) {
            return Err(KernelError::DuplicateVat(name));
        }
        self.run_queue.push_create_vat(name, vat);
        Ok(())
    }

    /// Drain the slog records written so far.
    pub fn take_slog(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.slog)
    }

    pub fn slog(&self) -> &[Value] {
        &self.slog
    }

    pub fn activity_hash(&self) -> String {
        hex::encode(self.activity_hash)
    }

    pub fn crank_count(&self) -> u64 {
        self.crank_count
    }

    pub fn run_queue_length(&self) -> usize {
        self.run_queue.len()
    }

    pub fn mailbox(&self) -> &MailboxDevice {
        &self.mailbox
    }

    pub fn installed_bundle(&self, id: &BundleId) -> Option<&Bundle> {
        self.bundles.get(id)
    }

    fn vat_known(&self, name: &str) -> bool {
        self.vats.contains_key(name) || self.run_queue.has_pending_vat(name)
    }

    fn ensure_live(&self) -> Result<(), KernelError> {
        if self.shut_down {
            Err(KernelError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn alloc_promise(&mut self) -> KernelPromiseId {
        let kpid = KernelPromiseId::new(self.next_promise);
        self.next_promise += 1;
        self.promises.insert(
            kpid.clone(),
            PromiseRecord {
                status: PromiseStatus::Unresolved,
                value: Value::Null,
            },
        );
        kpid
    }

    fn settle(&mut self, kpid: Option<&KernelPromiseId>, status: PromiseStatus, value: Value) {
        if let Some(record) = kpid.and_then(|kpid| self.promises.get_mut(kpid)) {
            record.status = status;
            record.value = value;
        }
    }

    fn enqueue(&mut self, target: ObjectRef, method: &str, args: Value) {
        self.run_queue.push_send(Message {
            target,
            method: method.to_string(),
            args,
            result: None,
        });
    }

    fn record_activity(&mut self, entry: &str) {
        let mut hasher = Sha256::new();
        hasher.update(self.activity_hash);
        hasher.update(entry.as_bytes());
        self.activity_hash = hasher.finalize().into();
    }

    fn crank(&mut self, item: RunQueueItem) -> Result<Option<CrankOutcome>, KernelError> {
        match item {
            RunQueueItem::CreateVat { name, vat } => {
                if self.vats.contains_key(&name) {
                    log::warn!("vat '{name}' already exists, dropping create request");
                    return Ok(Some(CrankOutcome::Failed));
                }
                log::debug!("created vat '{name}'");
                self.vats.insert(name, vat);
                Ok(None)
            }
            RunQueueItem::Send(message) => self.deliver(message).map(Some),
        }
    }

    fn deliver(&mut self, message: Message) -> Result<CrankOutcome, KernelError> {
        let Message {
            target,
            method,
            args,
            result,
        } = message;
        let Some(mut vat) = self.vats.remove(&target.vat) else {
            log::warn!("delivery {target}.{method} to unknown vat");
            self.settle(
                result.as_ref(),
                PromiseStatus::Rejected,
                json!({ "error": format!("no vat named '{}'", target.vat) }),
            );
            return Ok(CrankOutcome::Failed);
        };

        let vat_name = target.vat.clone();
        let next_object = self.next_objects.entry(vat_name.clone()).or_insert(0);
        let mut ctx = VatContext::new(
            &vat_name,
            self.timer.now(),
            next_object,
            &mut self.bridge,
            &mut self.mailbox,
        );
        let outcome = vat.deliver(&mut ctx, &target, &method, &args);
        let sends = std::mem::take(&mut ctx.sends);
        let wakeups = std::mem::take(&mut ctx.wakeups);
        let charged = ctx.computrons;
        drop(ctx);
        self.vats.insert(vat_name, vat);

        match outcome {
            Ok(value) => {
                self.settle(result.as_ref(), PromiseStatus::Fulfilled, value);
                for send in sends {
                    self.enqueue(send.target, &send.method, send.args);
                }
                for (deadline, handler) in wakeups {
                    self.timer.schedule(deadline, handler);
                }
                Ok(CrankOutcome::Complete(
                    self.base_computrons.saturating_add(charged),
                ))
            }
            Err(fault) if fault.fatal => Err(KernelError::Panic(format!(
                "{target}.{method}: {fault}"
            ))),
            Err(fault) => {
                log::debug!("delivery {target}.{method} failed: {fault}");
                self.settle(
                    result.as_ref(),
                    PromiseStatus::Rejected,
                    json!({ "error": fault.message }),
                );
                Ok(CrankOutcome::Failed)
            }
        }
    }

    fn publish_exports(&mut self) {
        if self.crank_count == self.exported_crank {
            return;
        }
        self.exported_crank = self.crank_count;
        let updates = vec![
            ExportUpdate {
                key: CRANK_NUMBER_KEY.to_string(),
                value: Some(self.crank_count.to_string()),
            },
            ExportUpdate {
                key: ACTIVITY_HASH_KEY.to_string(),
                value: Some(self.activity_hash()),
            },
        ];
        if let Some(export) = self.export.as_mut() {
            export(updates);
        }
    }
}

#[async_trait]
impl KernelController for SimKernel {
    async fn run(&mut self, policy: &mut dyn RunPolicy) -> Result<u64, KernelError> {
        self.ensure_live()?;
        if self.run_queue.is_empty() {
            policy.empty_crank();
            return Ok(0);
        }

        let mut cranks = 0;
        while let Some(item) = self.run_queue.pop() {
            self.crank_count += 1;
            cranks += 1;
            let description = item.describe();
            let outcome = self.crank(item);
            self.record_activity(&format!("{}:{description}", self.crank_count));
            let keep_running = match outcome {
                Ok(None) => policy.vat_created(),
                Ok(Some(CrankOutcome::Complete(computrons))) => {
                    policy.crank_complete(&CrankDetails {
                        computrons: Some(computrons),
                    })
                }
                Ok(Some(CrankOutcome::Failed)) => policy.crank_failed(),
                Err(err) => {
                    self.publish_exports();
                    return Err(err);
                }
            };
            if !keep_running {
                log::debug!(
                    "run policy stopped the kernel with {} item(s) queued",
                    self.run_queue.len()
                );
                break;
            }
        }
        self.publish_exports();
        Ok(cranks)
    }

    fn queue_to_vat_root(
        &mut self,
        vat_name: &str,
        method: &str,
        args: Value,
    ) -> Result<KernelPromiseId, KernelError> {
        self.queue_to_vat_object(&ObjectRef::root(vat_name), method, args)
    }

    fn queue_to_vat_object(
        &mut self,
        target: &ObjectRef,
        method: &str,
        args: Value,
    ) -> Result<KernelPromiseId, KernelError> {
        self.ensure_live()?;
        if !self.vat_known(&target.vat) {
            return Err(KernelError::VatNotFound(target.vat.clone()));
        }
        let kpid = self.alloc_promise();
        self.run_queue.push_send(Message {
            target: target.clone(),
            method: method.to_string(),
            args,
            result: Some(kpid.clone()),
        });
        Ok(kpid)
    }

    fn kp_status(&self, kpid: &KernelPromiseId) -> Result<PromiseStatus, KernelError> {
        self.promises
            .get(kpid)
            .map(|record| record.status)
            .ok_or_else(|| KernelError::UnknownPromise(kpid.clone()))
    }

    fn kp_resolution(&self, kpid: &KernelPromiseId) -> Result<Value, KernelError> {
        let record = self
            .promises
            .get(kpid)
            .ok_or_else(|| KernelError::UnknownPromise(kpid.clone()))?;
        match record.status {
            PromiseStatus::Unresolved => Err(KernelError::PromiseUnsettled(kpid.clone())),
            _ => Ok(record.value.clone()),
        }
    }

    async fn validate_and_install_bundle(
        &mut self,
        bundle: &Bundle,
    ) -> Result<BundleId, KernelError> {
        self.ensure_live()?;
        let id = validate_bundle(bundle)?;
        log::debug!("installed bundle {id}");
        self.bundles.insert(id.clone(), bundle.clone());
        Ok(id)
    }

    fn write_slog_object(&mut self, record: Value) {
        log::trace!("slog {record}");
        self.slog.push(record);
    }

    fn get_stats(&self) -> KernelStats {
        let unresolved = self
            .promises
            .values()
            .filter(|record| record.status == PromiseStatus::Unresolved)
            .count();
        KernelStats {
            crank_count: self.crank_count,
            vat_count: self.vats.len() as u64,
            run_queue_length: self.run_queue.len() as u64,
            promise_count: self.promises.len() as u64,
            unresolved_promise_count: unresolved as u64,
            installed_bundle_count: self.bundles.len() as u64,
            pending_wakeup_count: self.timer.len() as u64,
        }
    }

    fn poll_timer(&mut self, now: u64) -> bool {
        let due = self.timer.poll(now);
        let fired = !due.is_empty();
        for entry in due {
            self.enqueue(entry.handler, "wake", json!([entry.deliver_at]));
        }
        fired
    }

    fn deliver_mailbox(
        &mut self,
        peer: &str,
        messages: &[MailboxMessage],
        ack: u64,
    ) -> Result<bool, KernelError> {
        let handler = self
            .mailbox_handler
            .clone()
            .ok_or(KernelError::MailboxNotConfigured)?;
        let (fresh, changed) = self.mailbox.deliver_inbound(peer, messages, ack);
        if !fresh.is_empty() {
            self.enqueue(
                handler,
                "deliverInboundMessages",
                json!({ "peer": peer, "messages": fresh, "ack": ack }),
            );
        } else if changed {
            self.enqueue(handler, "deliverInboundAck", json!({ "peer": peer, "ack": ack }));
        }
        Ok(changed)
    }

    fn deliver_bridge(&mut self, bridge: BridgeId, body: Value) -> Result<(), KernelError> {
        let handler = self.bridge.handler(bridge)?.clone();
        self.enqueue(handler, "inbound", json!([bridge.as_str(), body]));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), KernelError> {
        log::debug!("kernel shutting down after {} cranks", self.crank_count);
        self.shut_down = true;
        Ok(())
    }
}
