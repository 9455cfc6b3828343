//! The block manager: drives the kernel in lock-step with the chain's
//! BEGIN / END / COMMIT / AFTER_COMMIT block cycle.
//!
//! All state lives in [`BlockManager`]. Calls are serialized by `&mut self`;
//! [`crate::service::BlockService`] serializes shared callers over a
//! channel. Kernel work only happens during END_BLOCK (and the one-off
//! bootstrap block), under a run policy that bounds how much compute the
//! block may use. Work the budget does not cover stays queued for later
//! blocks.
//!
//! Crash consistency rests on the host keys committed together at
//! COMMIT_BLOCK: `host.height`, `host.beginHeight`, `host.chainSends` and
//! the consumed head of each inbound queue. The queue stores apply their
//! consumption right after; [`crate::launch`] rolls forward any that missed
//! it.
//! After a restart the chain may re-send the last committed block; such a
//! block is not executed again, its recorded chain sends are replayed
//! instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cosmic_kernel::{BridgeId, Bundle, KernelController};
use cosmic_store::{HostStorage, host_key};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::action::{
    Action, BeginBlock, BlockHeader, CosmosInit, DeliverInbound, QueueEntry, action_type,
};
use crate::chain_sends::{ChainSend, ChainSendLog, ChainStorage};
use crate::client::KernelClient;
use crate::config::HostConfig;
use crate::error::{BlockError, DecoherenceError, DecoherenceKind};
use crate::export::ExportQueue;
use crate::hooks::{AfterCommitHook, UpgradeHook};
use crate::inbound_queue::InboundQueue;
use crate::installation::{InstallationPublisher, InstallationRecord, PublisherFactory};
use crate::metrics::{InboundQueueMetrics, InboundQueueStats};
use crate::params::BlockParams;
use crate::run_policy::{ChainRunPolicy, ComputronPricing, MeteredRunPolicy, never_stop};
use crate::slog::SlogEvent;

pub const HEIGHT_KEY: &str = "height";
pub const BEGIN_HEIGHT_KEY: &str = "beginHeight";
pub const CHAIN_SENDS_KEY: &str = "chainSends";
pub const ACTION_QUEUE_HEAD_KEY: &str = "actionQueueHead";
pub const HIGH_PRIORITY_QUEUE_HEAD_KEY: &str = "highPriorityQueueHead";

/// What a successful `blocking_send` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// AG_COSMOS_INIT finished.
    Initialized,
    /// A block lifecycle action finished.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    HighPriority,
    Normal,
}

struct AfterCommitWork {
    block_height: u64,
    block_time: u64,
    handle: JoinHandle<anyhow::Result<Map<String, Value>>>,
}

pub struct BlockManager<K> {
    pub(crate) kernel: K,
    pub(crate) host: Arc<dyn HostStorage>,
    pub(crate) action_queue: InboundQueue,
    pub(crate) high_priority_queue: InboundQueue,
    pub(crate) metrics: InboundQueueMetrics,
    pub(crate) chain_sends: ChainSendLog,
    pub(crate) saved_chain_sends: Vec<ChainSend>,
    pub(crate) chain_storage: Arc<dyn ChainStorage>,
    pub(crate) export_queue: Option<ExportQueue>,
    pub(crate) installation_publisher: Option<Arc<dyn InstallationPublisher>>,
    pub(crate) publisher_factory: Option<PublisherFactory>,
    pub(crate) after_commit: Arc<dyn AfterCommitHook>,
    pub(crate) upgrade: Arc<dyn UpgradeHook>,
    pub(crate) pricing: Arc<dyn ComputronPricing>,
    pub(crate) config: HostConfig,

    pub(crate) saved_height: u64,
    pub(crate) saved_begin_height: u64,
    pub(crate) block_params: Option<BlockParams>,
    pub(crate) decohered: Option<DecoherenceError>,

    pub(crate) run_num: u64,
    pub(crate) run_time: Duration,
    pub(crate) save_time: Duration,
    pub(crate) chain_time: Duration,
    pub(crate) end_block_finish: Option<Instant>,
    after_commit_work: Option<AfterCommitWork>,
}

impl<K> std::fmt::Debug for BlockManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("saved_height", &self.saved_height)
            .field("saved_begin_height", &self.saved_begin_height)
            .field("block_params", &self.block_params)
            .field("decohered", &self.decohered)
            .finish_non_exhaustive()
    }
}

impl<K: KernelController> BlockManager<K> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kernel: K,
        host: Arc<dyn HostStorage>,
        action_queue: InboundQueue,
        high_priority_queue: InboundQueue,
        metrics: InboundQueueMetrics,
        chain_sends: ChainSendLog,
        saved_chain_sends: Vec<ChainSend>,
        chain_storage: Arc<dyn ChainStorage>,
        export_queue: Option<ExportQueue>,
        publisher_factory: Option<PublisherFactory>,
        after_commit: Arc<dyn AfterCommitHook>,
        upgrade: Arc<dyn UpgradeHook>,
        pricing: Arc<dyn ComputronPricing>,
        config: HostConfig,
        saved_height: u64,
        saved_begin_height: u64,
    ) -> Self {
        Self {
            kernel,
            host,
            action_queue,
            high_priority_queue,
            metrics,
            chain_sends,
            saved_chain_sends,
            chain_storage,
            export_queue,
            installation_publisher: None,
            publisher_factory,
            after_commit,
            upgrade,
            pricing,
            config,
            saved_height,
            saved_begin_height,
            block_params: None,
            decohered: None,
            run_num: 0,
            run_time: Duration::ZERO,
            save_time: Duration::ZERO,
            chain_time: Duration::ZERO,
            end_block_finish: None,
            after_commit_work: None,
        }
    }

    pub fn saved_height(&self) -> u64 {
        self.saved_height
    }

    pub fn saved_begin_height(&self) -> u64 {
        self.saved_begin_height
    }

    pub fn block_params(&self) -> Option<&BlockParams> {
        self.block_params.as_ref()
    }

    pub fn decoherence(&self) -> Option<&DecoherenceError> {
        self.decohered.as_ref()
    }

    pub fn queue_stats(&self) -> InboundQueueStats {
        self.metrics.get_stats()
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Typed request helper over the kernel. Only for use between blocks.
    pub fn kernel_client(&mut self) -> KernelClient<'_, K> {
        KernelClient::new(&mut self.kernel)
    }

    pub fn write_slog_object(&mut self, record: Value) {
        self.kernel.write_slog_object(record);
    }

    /// Handle one lifecycle action from the chain.
    ///
    /// Waits for the previous block's after-commit work first and for
    /// pending kernel-state exports before returning. Once the manager has
    /// decohered every call fails with the stored error.
    pub async fn blocking_send(&mut self, action: Action) -> Result<ActionOutcome, BlockError> {
        if let Some(err) = &self.decohered {
            return Err(BlockError::Decohered(err.clone()));
        }
        self.wait_for_after_commit().await;

        let result = self.do_blocking_send(action).await;
        let exported = self.flush_exports().await;
        let outcome = result?;
        exported?;
        Ok(outcome)
    }

    /// Wait for the after-commit work of the last block, if any, and record
    /// its stats.
    pub async fn wait_for_after_commit(&mut self) {
        let Some(work) = self.after_commit_work.take() else {
            return;
        };
        match work.handle.await {
            Ok(Ok(stats)) => self.slog(SlogEvent::CosmicSwingsetAfterCommitStats {
                block_height: work.block_height,
                block_time: work.block_time,
                stats,
            }),
            Ok(Err(err)) => tracing::error!(
                block_height = work.block_height,
                error = %format!("{err:#}"),
                "after-commit hook failed"
            ),
            Err(err) => tracing::error!(
                block_height = work.block_height,
                error = %err,
                "after-commit task did not complete"
            ),
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), BlockError> {
        self.wait_for_after_commit().await;
        self.flush_exports().await?;
        self.kernel.shutdown().await?;
        tracing::info!(saved_height = self.saved_height, "block manager shut down");
        Ok(())
    }

    async fn do_blocking_send(&mut self, action: Action) -> Result<ActionOutcome, BlockError> {
        match action {
            Action::CosmosInit(init) => self.cosmos_init(init).await,
            Action::BeginBlock(begin) => self.begin_block(begin),
            Action::EndBlock(header) => self.end_block(header).await,
            Action::CommitBlock(header) => self.commit_block(header).await,
            Action::AfterCommitBlock(header) => self.after_commit_block(header),
            other => Err(BlockError::UnrecognizedAction {
                action_type: other.action_type().to_string(),
            }),
        }
    }

    async fn cosmos_init(&mut self, init: CosmosInit) -> Result<ActionOutcome, BlockError> {
        let block_time = init.block_time;
        if init.is_bootstrap {
            if self.config.verbose_blocks {
                tracing::info!("block bootstrap");
            }
            if self.saved_height != 0 || self.saved_begin_height != 0 {
                return Err(BlockError::InvariantViolation {
                    message: format!(
                        "Cannot run a bootstrap block at height {}",
                        self.saved_height
                    ),
                });
            }
            self.slog(SlogEvent::CosmicSwingsetBootstrapBlockStart { block_time });
            self.slog(SlogEvent::CosmicSwingsetRunStart {
                block_height: 0,
                run_num: 0,
                initial_beans: None,
            });
            self.save_begin_height(self.saved_begin_height)?;

            let start = Instant::now();
            let result = self.bootstrap_block(block_time).await;
            self.record_run_time(action_type::AG_COSMOS_INIT, start, &result);
            result?;

            self.slog(SlogEvent::CosmicSwingsetRunFinish {
                block_height: 0,
                run_num: 0,
                remaining_beans: None,
                used_beans: None,
            });
            self.slog(SlogEvent::CosmicSwingsetBootstrapBlockFinish { block_time });
        }

        if let Some(plan) = init.upgrade_plan {
            let block_height = plan.height;
            if self.block_needs_execution(block_height)? {
                self.slog(SlogEvent::CosmicSwingsetUpgradeStart {
                    block_height,
                    block_time,
                    upgrade_plan: plan.clone(),
                });
                let upgrade = self.upgrade.clone();
                upgrade
                    .apply(&plan, block_time)
                    .await
                    .map_err(|err| BlockError::Chain(format!("upgrade {}: {err:#}", plan.name)))?;
                self.slog(SlogEvent::CosmicSwingsetUpgradeFinish {
                    block_height,
                    block_time,
                });
            }
        }
        Ok(ActionOutcome::Initialized)
    }

    fn begin_block(&mut self, begin: BeginBlock) -> Result<ActionOutcome, BlockError> {
        let BeginBlock {
            block_height,
            block_time,
            params,
        } = begin;
        self.block_params = Some(BlockParams::parse(&params)?);
        if self.config.verbose_blocks {
            tracing::info!(block_height, "block begin");
        }
        self.run_time = Duration::ZERO;

        if self.block_needs_execution(block_height)? {
            if self.saved_begin_height == block_height {
                return Err(self.decohere(
                    DecoherenceKind::ReBegin,
                    format!(
                        "Inconsistent committed state. Block {block_height} had already began execution"
                    ),
                ));
            }
            self.save_begin_height(block_height)?;
        }

        let inbound_queue_stats = self.metrics.get_stats();
        self.slog(SlogEvent::CosmicSwingsetBeginBlock {
            block_height,
            block_time,
            inbound_queue_stats,
        });
        Ok(ActionOutcome::Done)
    }

    async fn end_block(&mut self, header: BlockHeader) -> Result<ActionOutcome, BlockError> {
        let BlockHeader {
            block_height,
            block_time,
        } = header;
        self.slog(SlogEvent::CosmicSwingsetEndBlockStart {
            block_height,
            block_time,
        });

        let Some(params) = self.block_params.clone() else {
            return Err(self.decohere(DecoherenceKind::EndWithoutBegin, "blockParams missing"));
        };

        if !self.block_needs_execution(block_height)? {
            // Re-evaluating a committed block after a restart: do no kernel
            // work and make exactly the same calls into the chain.
            let saved = self.saved_chain_sends.clone();
            if let Err(mismatch) = self.chain_sends.replay(&saved) {
                return Err(self.decohere(DecoherenceKind::ReplayFailed, mismatch.to_string()));
            }
            tracing::debug!(block_height, sends = saved.len(), "replayed chain sends");
        } else {
            if block_height != self.saved_begin_height {
                return Err(self.decohere(
                    DecoherenceKind::BeginMismatch,
                    format!(
                        "Inconsistent committed state. Trying to end block {block_height}, expected began block {}",
                        self.saved_begin_height
                    ),
                ));
            }
            self.provide_installation_publisher();

            let start = Instant::now();
            let result = self.execute_block(block_height, block_time, &params).await;
            self.record_run_time(action_type::END_BLOCK, start, &result);
            result?;

            let start = Instant::now();
            let chain_storage = self.chain_storage.clone();
            chain_storage
                .commit()
                .await
                .map_err(|err| BlockError::Chain(format!("{err:#}")))?;
            self.chain_time = start.elapsed();

            self.saved_height = block_height;
        }

        let inbound_queue_stats = self.metrics.get_stats();
        self.slog(SlogEvent::CosmicSwingsetEndBlockFinish {
            block_height,
            block_time,
            inbound_queue_stats,
        });
        self.end_block_finish = Some(Instant::now());
        Ok(ActionOutcome::Done)
    }

    async fn commit_block(&mut self, header: BlockHeader) -> Result<ActionOutcome, BlockError> {
        let BlockHeader {
            block_height,
            block_time,
        } = header;
        if self.config.verbose_blocks {
            tracing::info!(block_height, "block commit");
        }
        if block_height != self.saved_height {
            return Err(self.decohere(
                DecoherenceKind::CommitMismatch,
                format!(
                    "Committed height {block_height} does not match saved height {}",
                    self.saved_height
                ),
            ));
        }

        self.slog(SlogEvent::CosmicSwingsetCommitBlockStart {
            block_height,
            block_time,
        });

        let start = Instant::now();
        self.flush_exports().await?;
        self.save_outside_state(block_height)?;
        self.save_time = start.elapsed();

        self.block_params = None;

        tracing::debug!(
            block_height,
            run_ms = self.run_time.as_millis() as u64,
            chain_save_ms = self.chain_time.as_millis() as u64,
            kernel_save_ms = self.save_time.as_millis() as u64,
            "wrote checkpoint"
        );
        Ok(ActionOutcome::Done)
    }

    fn after_commit_block(&mut self, header: BlockHeader) -> Result<ActionOutcome, BlockError> {
        let BlockHeader {
            block_height,
            block_time,
        } = header;
        let full_save_time = self
            .end_block_finish
            .map(|finish| finish.elapsed())
            .unwrap_or_default();
        self.slog(SlogEvent::CosmicSwingsetCommitBlockFinish {
            block_height,
            block_time,
            run_time: self.run_time.as_secs_f64(),
            save_time: self.save_time.as_secs_f64(),
            chain_time: self.chain_time.as_secs_f64(),
            full_save_time: full_save_time.as_secs_f64(),
        });

        let hook = self.after_commit.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            hook.after_commit(block_height, block_time).await
        });
        self.after_commit_work = Some(AfterCommitWork {
            block_height,
            block_time,
            handle,
        });
        Ok(ActionOutcome::Done)
    }

    /// Decide whether `block_height` must run, or is a replay of the last
    /// committed block. Any other height wedges the node.
    fn block_needs_execution(&mut self, block_height: u64) -> Result<bool, BlockError> {
        if self.saved_height == 0 {
            // Only the bootstrap block has run; the first real block may
            // have any height.
            return Ok(true);
        }
        if block_height == self.saved_height + 1 {
            return Ok(true);
        }
        if block_height == self.saved_height {
            return Ok(false);
        }
        Err(self.decohere(
            DecoherenceKind::StateReset,
            format!(
                "Unimplemented reset state from {} to {block_height}",
                self.saved_height
            ),
        ))
    }

    fn decohere(&mut self, kind: DecoherenceKind, message: impl Into<String>) -> BlockError {
        let err = DecoherenceError::new(kind, message);
        tracing::error!(kind = ?kind, error = %err, "block manager decohered");
        self.decohered = Some(err.clone());
        BlockError::Decohered(err)
    }

    fn save_begin_height(&mut self, block_height: u64) -> Result<(), BlockError> {
        self.saved_begin_height = block_height;
        self.host
            .set(&host_key(BEGIN_HEIGHT_KEY), &block_height.to_string())?;
        Ok(())
    }

    fn save_outside_state(&mut self, block_height: u64) -> Result<(), BlockError> {
        let chain_sends = self.chain_sends.clear();
        let encoded = serde_json::to_string(&chain_sends)
            .map_err(|err| BlockError::Chain(format!("encoding chain sends: {err}")))?;
        self.host
            .set(&host_key(HEIGHT_KEY), &block_height.to_string())?;
        self.host.set(&host_key(CHAIN_SENDS_KEY), &encoded)?;
        let queues = [
            (ACTION_QUEUE_HEAD_KEY, &self.action_queue),
            (HIGH_PRIORITY_QUEUE_HEAD_KEY, &self.high_priority_queue),
        ];
        for (key, queue) in queues {
            if let Some(marker) = queue.pending_marker(block_height) {
                let encoded = serde_json::to_string(&marker)
                    .map_err(|err| BlockError::Chain(format!("encoding {key}: {err}")))?;
                self.host.set(&host_key(key), &encoded)?;
            }
        }
        self.host.commit()?;
        self.saved_chain_sends = chain_sends;

        self.action_queue.commit_consumed(block_height)?;
        self.high_priority_queue.commit_consumed(block_height)?;
        Ok(())
    }

    async fn flush_exports(&mut self) -> Result<(), BlockError> {
        match &self.export_queue {
            Some(queue) => queue.flush().await.map_err(BlockError::Export),
            None => Ok(()),
        }
    }

    fn provide_installation_publisher(&mut self) {
        if self.installation_publisher.is_none() {
            if let Some(factory) = self.publisher_factory.take() {
                self.installation_publisher = Some(factory());
            }
        }
    }

    /// Timing wrapper: adds the elapsed time to `run_time` and logs a failed
    /// result without consuming it.
    fn record_run_time<T>(
        &mut self,
        action_type: &str,
        start: Instant,
        result: &Result<T, BlockError>,
    ) {
        self.run_time += start.elapsed();
        if let Err(err) = result {
            tracing::error!(action_type, error = %err, "action failed");
        }
    }

    fn slog(&mut self, event: SlogEvent) {
        self.kernel.write_slog_object(event.to_value());
    }

    async fn bootstrap_block(&mut self, block_time: u64) -> Result<(), BlockError> {
        // Bootstrap needs to know the chain time of the genesis or upgrade
        // block before it opens for business.
        self.kernel.poll_timer(block_time);
        let mut policy = never_stop();
        self.kernel.run(&mut policy).await?;
        Ok(())
    }

    async fn execute_block(
        &mut self,
        block_height: u64,
        block_time: u64,
        params: &BlockParams,
    ) -> Result<(), BlockError> {
        let queued = self.action_queue.size()? + self.high_priority_queue.size()?;
        self.metrics.update_length(queued);

        let mut policy =
            MeteredRunPolicy::with_pricing(params.beans_per_unit, self.pricing.clone());
        self.run_num = 0;
        self.run_kernel(&mut policy, block_height, block_time).await?;

        if let Some(spin) = self.config.end_block_spin {
            let start = Instant::now();
            while start.elapsed() < spin {
                std::hint::spin_loop();
            }
        }
        Ok(())
    }

    async fn run_kernel<P: ChainRunPolicy>(
        &mut self,
        policy: &mut P,
        block_height: u64,
        block_time: u64,
    ) -> Result<(), BlockError> {
        // Leftover work from the previous block goes first.
        if !self.run_swingset(policy, block_height).await? {
            return Ok(());
        }
        if !self
            .process_actions(QueueKind::HighPriority, policy, block_height)
            .await?
        {
            return Ok(());
        }

        let added = self.kernel.poll_timer(block_time);
        tracing::debug!(block_height, block_time, added, "polled timer");
        // Run even when nothing was added: the kernel only records exports
        // and activity when it attempts a crank.
        if !self.run_swingset(policy, block_height).await? {
            return Ok(());
        }

        self.process_actions(QueueKind::Normal, policy, block_height)
            .await?;
        Ok(())
    }

    async fn run_swingset<P: ChainRunPolicy>(
        &mut self,
        policy: &mut P,
        block_height: u64,
    ) -> Result<bool, BlockError> {
        let run_num = self.run_num;
        let initial_beans = policy.remaining_beans();
        self.slog(SlogEvent::CosmicSwingsetRunStart {
            block_height,
            run_num,
            initial_beans,
        });
        let cranks = self.kernel.run(policy).await?;
        let remaining_beans = policy.remaining_beans();
        let stats = self.kernel.get_stats();
        self.slog(SlogEvent::KernelStats { stats });
        self.slog(SlogEvent::CosmicSwingsetRunFinish {
            block_height,
            run_num,
            remaining_beans,
            used_beans: initial_beans
                .zip(remaining_beans)
                .map(|(initial, remaining)| initial.saturating_sub(remaining)),
        });
        tracing::trace!(block_height, run_num, cranks, "kernel run finished");
        self.run_num += 1;
        Ok(policy.should_run())
    }

    /// Dispatch queued actions in order, running the kernel after each.
    /// Entries not reached stay queued for the next block.
    async fn process_actions<P: ChainRunPolicy>(
        &mut self,
        kind: QueueKind,
        policy: &mut P,
        block_height: u64,
    ) -> Result<bool, BlockError> {
        let queue = match kind {
            QueueKind::HighPriority => self.high_priority_queue.clone(),
            QueueKind::Normal => self.action_queue.clone(),
        };
        let mut keep_going = true;
        for entry in queue.consume_all()? {
            let QueueEntry { action, context } = entry?;
            let inbound_num = context.inbound_num();
            self.metrics.dec_stat();
            self.perform_action(action, &inbound_num).await?;
            keep_going = self.run_swingset(policy, block_height).await?;
            if !keep_going {
                tracing::debug!(block_height, queue = ?kind, "block budget exhausted");
                break;
            }
        }
        Ok(keep_going)
    }

    async fn perform_action(&mut self, action: Action, inbound_num: &str) -> Result<(), BlockError> {
        match action {
            Action::DeliverInbound(deliver) => self.deliver_inbound(deliver, inbound_num),
            Action::VbankBalanceUpdate(body) => {
                self.bridge_inbound(BridgeId::Bank, body, inbound_num)
            }
            Action::IbcEvent(body) => self.bridge_inbound(BridgeId::Dibc, body, inbound_num),
            Action::PleaseProvision(body) => {
                self.bridge_inbound(BridgeId::Provision, body, inbound_num)
            }
            Action::InstallBundle(install) => self.install_bundle(&install.bundle).await,
            Action::CoreEval(body) => self.bridge_inbound(BridgeId::Core, body, inbound_num),
            Action::WalletAction(body) | Action::WalletSpendAction(body) => {
                self.bridge_inbound(BridgeId::Wallet, body, inbound_num)
            }
            other => Err(BlockError::UnrecognizedAction {
                action_type: other.action_type().to_string(),
            }),
        }
    }

    fn deliver_inbound(
        &mut self,
        deliver: DeliverInbound,
        inbound_num: &str,
    ) -> Result<(), BlockError> {
        let DeliverInbound {
            peer,
            messages,
            ack,
        } = deliver;
        self.slog(SlogEvent::CosmicSwingsetDeliverInbound {
            inbound_num: inbound_num.to_string(),
            sender: peer.clone(),
            count: messages.len(),
        });
        if self.kernel.deliver_mailbox(&peer, &messages, ack)? {
            tracing::debug!(inbound_num, peer = %peer, "mailbox accepted new messages");
        }
        Ok(())
    }

    fn bridge_inbound(
        &mut self,
        bridge: BridgeId,
        body: Value,
        inbound_num: &str,
    ) -> Result<(), BlockError> {
        self.slog(SlogEvent::CosmicSwingsetBridgeInbound {
            inbound_num: inbound_num.to_string(),
            source: bridge.as_str().to_string(),
        });
        self.kernel.deliver_bridge(bridge, body)?;
        Ok(())
    }

    async fn install_bundle(&mut self, source: &str) -> Result<(), BlockError> {
        let bundle: Bundle = match serde_json::from_str(source) {
            Ok(bundle) => bundle,
            Err(err) => {
                tracing::warn!(error = %err, "INSTALL_BUNDLE: bundle is not valid JSON");
                return Ok(());
            }
        };
        let error = match self.kernel.validate_and_install_bundle(&bundle).await {
            Ok(id) => {
                tracing::debug!(bundle_id = %id, "installed bundle");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "INSTALL_BUNDLE: bundle rejected");
                Some(err.to_string())
            }
        };
        let Some(publisher) = self.installation_publisher.clone() else {
            return Ok(());
        };
        let record = InstallationRecord {
            endo_zip_base64_sha512: bundle.endo_zip_base64_sha512,
            installed: error.is_none(),
            error,
        };
        publisher
            .publish(&record)
            .await
            .map_err(|err| BlockError::Chain(format!("publishing installation: {err:#}")))
    }
}
