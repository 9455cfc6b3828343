//! Typed slog records written by the block manager.
//!
//! The slog is an observability stream only; nothing reads it back to make
//! decisions. Records serialize with a kebab-case `type` tag and camelCase
//! fields.

use cosmic_kernel::KernelStats;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::action::UpgradePlan;
use crate::metrics::InboundQueueStats;
use crate::run_policy::Beans;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SlogEvent {
    CosmicSwingsetBootstrapBlockStart {
        block_time: u64,
    },
    CosmicSwingsetBootstrapBlockFinish {
        block_time: u64,
    },
    CosmicSwingsetUpgradeStart {
        block_height: u64,
        block_time: u64,
        upgrade_plan: UpgradePlan,
    },
    CosmicSwingsetUpgradeFinish {
        block_height: u64,
        block_time: u64,
    },
    CosmicSwingsetBeginBlock {
        block_height: u64,
        block_time: u64,
        inbound_queue_stats: InboundQueueStats,
    },
    CosmicSwingsetEndBlockStart {
        block_height: u64,
        block_time: u64,
    },
    CosmicSwingsetEndBlockFinish {
        block_height: u64,
        block_time: u64,
        inbound_queue_stats: InboundQueueStats,
    },
    CosmicSwingsetCommitBlockStart {
        block_height: u64,
        block_time: u64,
    },
    /// Durations are in seconds.
    CosmicSwingsetCommitBlockFinish {
        block_height: u64,
        block_time: u64,
        run_time: f64,
        save_time: f64,
        chain_time: f64,
        full_save_time: f64,
    },
    CosmicSwingsetAfterCommitStats {
        block_height: u64,
        block_time: u64,
        #[serde(flatten)]
        stats: Map<String, Value>,
    },
    CosmicSwingsetRunStart {
        block_height: u64,
        run_num: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_beans: Option<Beans>,
    },
    CosmicSwingsetRunFinish {
        block_height: u64,
        run_num: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_beans: Option<Beans>,
        #[serde(skip_serializing_if = "Option::is_none")]
        used_beans: Option<Beans>,
    },
    KernelStats {
        stats: KernelStats,
    },
    CosmicSwingsetDeliverInbound {
        inbound_num: String,
        sender: String,
        count: usize,
    },
    CosmicSwingsetBridgeInbound {
        inbound_num: String,
        source: String,
    },
}

impl SlogEvent {
    pub fn to_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode slog record");
                Value::Null
            }
        }
    }
}
