//! Shared harness for the block manager integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! look unused from any single test file.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cosmic_host::action::{Action, BeginBlock, BlockHeader, CosmosInit, InstallBundle};
use cosmic_host::chain_sends::{ChainOutbound, ChainSendLog, MailboxChainStorage};
use cosmic_host::export::{ExportQueue, MemExportSink};
use cosmic_host::hooks::{AfterCommitHook, UpgradeHook};
use cosmic_host::installation::{ChainStoragePublisher, InstallationPublisher};
use cosmic_host::params::{BeansPerUnit, encode_params};
use cosmic_host::run_policy::Beans;
use cosmic_host::{
    ActionOutcome, BlockError, BlockManager, HostConfig, InboundContext, InboundQueue,
    LaunchOptions, QueueEntry, launch,
};
use cosmic_kernel::{BridgeId, ObjectRef, SimKernel, VatFault, vat_fn};
use cosmic_store::MemHostStore;
use serde_json::{Value, json};

pub const HANDLER: &str = "bootstrap";

/// Host and queue stores of one node. Clones share state.
#[derive(Clone, Default)]
pub struct Stores {
    pub host: MemHostStore,
    pub actions: MemHostStore,
    pub high: MemHostStore,
}

impl Stores {
    /// Handles that only see committed data, as after a crash.
    pub fn reopen(&self) -> Stores {
        Stores {
            host: self.host.reopen(),
            actions: self.actions.reopen(),
            high: self.high.reopen(),
        }
    }
}

/// Chain that answers every send with a deterministic echo.
pub fn echo_chain() -> Arc<dyn ChainOutbound> {
    Arc::new(|destination: &str, message: &Value| {
        json!({ "destination": destination, "method": message["method"] })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    High,
    Normal,
}

pub struct Harness {
    pub manager: BlockManager<SimKernel>,
    pub stores: Stores,
    pub action_queue: InboundQueue,
    pub high_priority_queue: InboundQueue,
    pub chain: ChainSendLog,
    pub outbound: Arc<dyn ChainOutbound>,
    pub deliveries: Arc<Mutex<Vec<String>>>,
    pub exports: MemExportSink,
    pub next_tx: u64,
}

pub struct HarnessOptions {
    pub config: HostConfig,
    pub after_commit: Option<Arc<dyn AfterCommitHook>>,
    pub upgrade: Option<Arc<dyn UpgradeHook>>,
    pub publish_installations: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config: HostConfig::default(),
            after_commit: None,
            upgrade: None,
            publish_installations: true,
        }
    }
}

impl Harness {
    /// Fresh node with empty stores. Needs a tokio runtime.
    pub fn new() -> Harness {
        Harness::start(Stores::default(), echo_chain(), HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Harness {
        Harness::start(Stores::default(), echo_chain(), options)
    }

    pub fn start(
        stores: Stores,
        outbound: Arc<dyn ChainOutbound>,
        options: HarnessOptions,
    ) -> Harness {
        let chain = ChainSendLog::new(outbound.clone());
        let mailbox_storage = MailboxChainStorage::new(chain.clone());
        let exports = MemExportSink::default();
        let export_queue = ExportQueue::spawn(exports.clone());
        let deliveries = Arc::new(Mutex::new(Vec::new()));

        let root = ObjectRef::root(HANDLER);
        let mut builder = SimKernel::builder()
            .vat(HANDLER, recording_vat(deliveries.clone()))
            .mailbox_handler(root.clone())
            .bridge_outbound(Box::new(chain.clone()))
            .mailbox_storage(Box::new(mailbox_storage.clone()))
            .export_callback(export_queue.callback());
        for bridge in [
            BridgeId::Bank,
            BridgeId::Core,
            BridgeId::Dibc,
            BridgeId::Provision,
            BridgeId::Wallet,
        ] {
            builder = builder.bridge_handler(bridge, root.clone());
        }
        let kernel = builder.build().unwrap();

        let mut launch_options = LaunchOptions::new(
            kernel,
            Arc::new(stores.host.clone()),
            Arc::new(stores.actions.clone()),
            Arc::new(stores.high.clone()),
        )
        .chain_sends(chain.clone())
        .chain_storage(Arc::new(mailbox_storage))
        .export_queue(export_queue)
        .config(options.config);
        if let Some(hook) = options.after_commit {
            launch_options = launch_options.after_commit(hook);
        }
        if let Some(hook) = options.upgrade {
            launch_options = launch_options.upgrade(hook);
        }
        if options.publish_installations {
            let publisher_chain = chain.clone();
            launch_options =
                launch_options.publisher_factory(Box::new(move || -> Arc<dyn InstallationPublisher> {
                    Arc::new(ChainStoragePublisher::new(publisher_chain))
                }));
        }

        let launched = launch(launch_options).unwrap();
        Harness {
            manager: launched.manager,
            stores,
            action_queue: launched.action_queue,
            high_priority_queue: launched.high_priority_queue,
            chain,
            outbound,
            deliveries,
            exports,
            next_tx: 0,
        }
    }

    /// Drop this node and start a new one from the committed stores.
    pub fn restart(self) -> Harness {
        let outbound = self.outbound.clone();
        self.restart_with_chain(outbound)
    }

    pub fn restart_with_chain(self, outbound: Arc<dyn ChainOutbound>) -> Harness {
        let stores = self.stores.reopen();
        drop(self);
        Harness::start(stores, outbound, HarnessOptions::default())
    }

    pub async fn send(&mut self, action: Action) -> Result<ActionOutcome, BlockError> {
        self.manager.blocking_send(action).await
    }

    pub async fn bootstrap(&mut self, block_time: u64) {
        let outcome = self.send(init(true, block_time)).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Initialized);
    }

    /// BEGIN, END, COMMIT and AFTER_COMMIT for one block.
    pub async fn run_block(
        &mut self,
        block_height: u64,
        block_time: u64,
        prices: &BeansPerUnit,
    ) -> Result<(), BlockError> {
        self.send(begin(block_height, block_time, prices)).await?;
        self.send(end(block_height, block_time)).await?;
        self.send(commit(block_height, block_time)).await?;
        self.send(after_commit(block_height, block_time)).await?;
        Ok(())
    }

    /// Queue a core-eval whose delivery records `tag` and charges `cost`
    /// extra computrons.
    pub fn queue(&mut self, queue: Queue, tag: &str, cost: u64) {
        let action = Action::bridge("CORE_EVAL", json!({ "tag": tag, "cost": cost })).unwrap();
        self.push(queue, action);
    }

    /// Queue a core-eval whose delivery also makes a call into the chain.
    pub fn queue_chain_call(&mut self, tag: &str) {
        let action = Action::bridge("CORE_EVAL", json!({ "tag": tag, "chain": true })).unwrap();
        self.push(Queue::Normal, action);
    }

    pub fn queue_bundle(&mut self, bundle_json: String) {
        self.push(
            Queue::Normal,
            Action::InstallBundle(InstallBundle {
                bundle: bundle_json,
            }),
        );
    }

    pub fn push(&mut self, queue: Queue, action: Action) {
        self.next_tx += 1;
        let entry = QueueEntry {
            action,
            context: InboundContext {
                block_height: self.manager.saved_height(),
                tx_hash: format!("TX{}", self.next_tx),
                msg_idx: 0,
            },
        };
        let target = match queue {
            Queue::High => &self.high_priority_queue,
            Queue::Normal => &self.action_queue,
        };
        target.push(&entry).unwrap();
    }

    pub fn deliveries(&self) -> Vec<String> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn slog(&self) -> Vec<Value> {
        self.manager.kernel().slog().to_vec()
    }

    pub fn slog_types(&self) -> Vec<String> {
        self.slog()
            .iter()
            .filter_map(|record| record["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn committed_host(&self, key: &str) -> Option<String> {
        self.stores.host.committed().get(key).cloned()
    }
}

/// Handler vat for every device. Bridge bodies may carry `tag` (recorded),
/// `cost` (extra computrons) and `chain` (make a storage call).
fn recording_vat(deliveries: Arc<Mutex<Vec<String>>>) -> Box<dyn cosmic_kernel::Vat> {
    vat_fn(move |ctx, _target, method, args| match method {
        "inbound" => {
            let body = &args[1];
            let tag = body["tag"].as_str().unwrap_or("untagged").to_string();
            ctx.charge(body["cost"].as_u64().unwrap_or(0));
            if body["chain"].as_bool().unwrap_or(false) {
                ctx.bridge_send(
                    BridgeId::Storage,
                    &json!({ "method": "set", "args": [[tag.clone(), "1"]] }),
                );
            }
            deliveries.lock().unwrap().push(tag);
            Ok(Value::Null)
        }
        "deliverInboundMessages" => {
            let peer = args["peer"].as_str().unwrap_or_default().to_string();
            for message in args["messages"].as_array().into_iter().flatten() {
                let body = message[1].as_str().unwrap_or_default();
                deliveries.lock().unwrap().push(format!("mail:{body}"));
                ctx.mailbox_send(&peer, format!("re:{body}"));
            }
            Ok(Value::Null)
        }
        "deliverInboundAck" => Ok(Value::Null),
        "wake" => {
            deliveries.lock().unwrap().push("wake".into());
            Ok(Value::Null)
        }
        "fail" => Err(VatFault::new("asked to fail")),
        other => Err(VatFault::new(format!("unknown method {other}"))),
    })
}

pub fn prices(limit: u128) -> BeansPerUnit {
    BeansPerUnit {
        block_compute_limit: Beans(limit),
        vat_creation: Beans(0),
        xsnap_computron: Beans(1),
    }
}

pub fn init(is_bootstrap: bool, block_time: u64) -> Action {
    Action::CosmosInit(CosmosInit {
        is_bootstrap,
        block_time,
        upgrade_plan: None,
    })
}

pub fn begin(block_height: u64, block_time: u64, prices: &BeansPerUnit) -> Action {
    Action::BeginBlock(BeginBlock {
        block_height,
        block_time,
        params: encode_params(prices),
    })
}

pub fn end(block_height: u64, block_time: u64) -> Action {
    Action::EndBlock(BlockHeader {
        block_height,
        block_time,
    })
}

pub fn commit(block_height: u64, block_time: u64) -> Action {
    Action::CommitBlock(BlockHeader {
        block_height,
        block_time,
    })
}

pub fn after_commit(block_height: u64, block_time: u64) -> Action {
    Action::AfterCommitBlock(BlockHeader {
        block_height,
        block_time,
    })
}
