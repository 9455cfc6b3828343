//! Restore a block manager from the host store.

use std::sync::Arc;

use cosmic_kernel::KernelController;
use cosmic_store::{HostStorage, StoreError, host_key};

use crate::block_manager::{
    ACTION_QUEUE_HEAD_KEY, BEGIN_HEIGHT_KEY, BlockManager, CHAIN_SENDS_KEY, HEIGHT_KEY,
    HIGH_PRIORITY_QUEUE_HEAD_KEY,
};
use crate::chain_sends::{ChainSend, ChainSendLog, ChainStorage, NoChainStorage};
use crate::config::HostConfig;
use crate::error::BlockError;
use crate::export::ExportQueue;
use crate::hooks::{AfterCommitHook, NoAfterCommit, NoUpgrade, UpgradeHook};
use crate::inbound_queue::{ConsumedMarker, InboundQueue};
use crate::installation::PublisherFactory;
use crate::metrics::InboundQueueMetrics;
use crate::run_policy::{ComputronPricing, XsnapComputronPrice};

/// Everything a block manager is wired to.
///
/// The kernel must already be connected to `chain_sends` (as its bridge
/// outbound) and to `chain_storage` where the chain storage buffers kernel
/// output, so that every call into the chain is recorded.
pub struct LaunchOptions<K> {
    pub kernel: K,
    pub host_store: Arc<dyn HostStorage>,
    pub action_queue_store: Arc<dyn HostStorage>,
    pub high_priority_queue_store: Arc<dyn HostStorage>,
    pub chain_sends: ChainSendLog,
    pub chain_storage: Arc<dyn ChainStorage>,
    pub export_queue: Option<ExportQueue>,
    pub publisher_factory: Option<PublisherFactory>,
    pub after_commit: Arc<dyn AfterCommitHook>,
    pub upgrade: Arc<dyn UpgradeHook>,
    pub pricing: Arc<dyn ComputronPricing>,
    pub config: HostConfig,
}

impl<K: KernelController> LaunchOptions<K> {
    pub fn new(
        kernel: K,
        host_store: Arc<dyn HostStorage>,
        action_queue_store: Arc<dyn HostStorage>,
        high_priority_queue_store: Arc<dyn HostStorage>,
    ) -> Self {
        Self {
            kernel,
            host_store,
            action_queue_store,
            high_priority_queue_store,
            chain_sends: ChainSendLog::detached(),
            chain_storage: Arc::new(NoChainStorage),
            export_queue: None,
            publisher_factory: None,
            after_commit: Arc::new(NoAfterCommit),
            upgrade: Arc::new(NoUpgrade),
            pricing: Arc::new(XsnapComputronPrice),
            config: HostConfig::default(),
        }
    }

    pub fn chain_sends(mut self, chain_sends: ChainSendLog) -> Self {
        self.chain_sends = chain_sends;
        self
    }

    pub fn chain_storage(mut self, chain_storage: Arc<dyn ChainStorage>) -> Self {
        self.chain_storage = chain_storage;
        self
    }

    pub fn export_queue(mut self, export_queue: ExportQueue) -> Self {
        self.export_queue = Some(export_queue);
        self
    }

    pub fn publisher_factory(mut self, factory: PublisherFactory) -> Self {
        self.publisher_factory = Some(factory);
        self
    }

    pub fn after_commit(mut self, hook: Arc<dyn AfterCommitHook>) -> Self {
        self.after_commit = hook;
        self
    }

    pub fn upgrade(mut self, hook: Arc<dyn UpgradeHook>) -> Self {
        self.upgrade = hook;
        self
    }

    pub fn pricing(mut self, pricing: Arc<dyn ComputronPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug)]
pub struct Launched<K> {
    pub manager: BlockManager<K>,
    /// Producer handles for the chain side; pushes are durable immediately.
    pub action_queue: InboundQueue,
    pub high_priority_queue: InboundQueue,
    pub saved_height: u64,
    pub saved_chain_sends: Vec<ChainSend>,
}

/// Read the committed host state and assemble a manager around it.
pub fn launch<K: KernelController>(options: LaunchOptions<K>) -> Result<Launched<K>, BlockError> {
    let LaunchOptions {
        kernel,
        host_store,
        action_queue_store,
        high_priority_queue_store,
        chain_sends,
        chain_storage,
        export_queue,
        publisher_factory,
        after_commit,
        upgrade,
        pricing,
        config,
    } = options;

    let saved_height = read_height(host_store.as_ref(), HEIGHT_KEY)?.unwrap_or(0);
    let saved_begin_height =
        read_height(host_store.as_ref(), BEGIN_HEIGHT_KEY)?.unwrap_or(saved_height);
    let saved_chain_sends: Vec<ChainSend> = match host_store.get(&host_key(CHAIN_SENDS_KEY))? {
        Some(raw) => serde_json::from_str(&raw).map_err(|err| {
            StoreError::Corrupt(format!("{}: {err}", host_key(CHAIN_SENDS_KEY)))
        })?,
        None => Vec::new(),
    };

    let action_queue = InboundQueue::new(action_queue_store);
    let high_priority_queue = InboundQueue::new(high_priority_queue_store);
    for (key, queue) in [
        (ACTION_QUEUE_HEAD_KEY, &action_queue),
        (HIGH_PRIORITY_QUEUE_HEAD_KEY, &high_priority_queue),
    ] {
        if let Some(marker) = read_marker(host_store.as_ref(), key)? {
            if queue.roll_forward(marker)? {
                tracing::warn!(
                    queue = key,
                    block_height = marker.block_height,
                    head = marker.head,
                    "applied inbound queue consumption missed before restart"
                );
            }
        }
    }
    let metrics = InboundQueueMetrics::new(action_queue.size()? + high_priority_queue.size()?);

    tracing::info!(
        saved_height,
        saved_begin_height,
        chain_sends = saved_chain_sends.len(),
        debug_name = config.debug_name.as_deref().unwrap_or(""),
        "launching block manager"
    );

    let manager = BlockManager::new(
        kernel,
        host_store,
        action_queue.clone(),
        high_priority_queue.clone(),
        metrics,
        chain_sends,
        saved_chain_sends.clone(),
        chain_storage,
        export_queue,
        publisher_factory,
        after_commit,
        upgrade,
        pricing,
        config,
        saved_height,
        saved_begin_height,
    );
    Ok(Launched {
        manager,
        action_queue,
        high_priority_queue,
        saved_height,
        saved_chain_sends,
    })
}

fn read_height(store: &dyn HostStorage, path: &str) -> Result<Option<u64>, BlockError> {
    let key = host_key(path);
    match store.get(&key)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| StoreError::Corrupt(format!("{key} = {raw:?}")).into()),
        None => Ok(None),
    }
}

fn read_marker(store: &dyn HostStorage, path: &str) -> Result<Option<ConsumedMarker>, BlockError> {
    let key = host_key(path);
    match store.get(&key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StoreError::Corrupt(format!("{key}: {err}")).into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use cosmic_kernel::SimKernel;
    use cosmic_store::{KvStore, MemHostStore};
    use serde_json::json;

    use super::*;
    use crate::action::{Action, InboundContext, QueueEntry};

    fn options(host: &MemHostStore) -> LaunchOptions<SimKernel> {
        LaunchOptions::new(
            SimKernel::builder().build().unwrap(),
            Arc::new(host.clone()),
            Arc::new(MemHostStore::new()),
            Arc::new(MemHostStore::new()),
        )
    }

    #[test]
    fn fresh_store_starts_at_zero() {
        let host = MemHostStore::new();
        let launched = launch(options(&host)).unwrap();
        assert_eq!(launched.saved_height, 0);
        assert!(launched.saved_chain_sends.is_empty());
        assert_eq!(launched.manager.saved_begin_height(), 0);
    }

    #[test]
    fn committed_state_is_restored() {
        let host = MemHostStore::new();
        host.set("host.height", "41").unwrap();
        host.set("host.beginHeight", "41").unwrap();
        host.set(
            "host.chainSends",
            &json!([{"destination": "bank", "message": {"n": 1}, "result": null}]).to_string(),
        )
        .unwrap();
        host.commit().unwrap();

        let launched = launch(options(&host.reopen())).unwrap();
        assert_eq!(launched.saved_height, 41);
        assert_eq!(launched.manager.saved_begin_height(), 41);
        assert_eq!(launched.saved_chain_sends.len(), 1);
        assert_eq!(launched.saved_chain_sends[0].destination, "bank");
    }

    #[test]
    fn begin_height_defaults_to_saved_height() {
        let host = MemHostStore::new();
        host.set("host.height", "7").unwrap();
        let launched = launch(options(&host)).unwrap();
        assert_eq!(launched.manager.saved_begin_height(), 7);
    }

    #[test]
    fn queue_consumption_missed_at_commit_is_rolled_forward() {
        let host = MemHostStore::new();
        let actions = MemHostStore::new();
        let queue = InboundQueue::new(Arc::new(actions.clone()));
        for n in 0..3 {
            queue
                .push(&QueueEntry {
                    action: Action::bridge("CORE_EVAL", json!({ "n": n })).unwrap(),
                    context: InboundContext {
                        block_height: 1,
                        tx_hash: format!("tx{n}"),
                        msg_idx: 0,
                    },
                })
                .unwrap();
        }
        // The host store committed block 2 with two entries consumed; the
        // queue store crashed before applying them.
        host.set("host.height", "2").unwrap();
        host.set(
            "host.actionQueueHead",
            &json!({"blockHeight": 2, "head": 2}).to_string(),
        )
        .unwrap();
        host.commit().unwrap();

        let launched = launch(LaunchOptions::new(
            SimKernel::builder().build().unwrap(),
            Arc::new(host.reopen()),
            Arc::new(actions.reopen()),
            Arc::new(MemHostStore::new()),
        ))
        .unwrap();
        assert_eq!(launched.action_queue.size().unwrap(), 1);
        let rest: Vec<_> = launched
            .action_queue
            .consume_all()
            .unwrap()
            .map(|e| e.unwrap().context.tx_hash)
            .collect();
        assert_eq!(rest, ["tx2"]);
    }

    #[test]
    fn corrupt_height_is_reported() {
        let host = MemHostStore::new();
        host.set("host.height", "forty").unwrap();
        let err = launch(options(&host)).unwrap_err();
        assert!(matches!(err, BlockError::Store(StoreError::Corrupt(_))));
    }
}
