//! Collaborator hooks the chain integration layer can inject.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::action::UpgradePlan;

/// Work run after each commit, once the host is quiescent. The returned
/// object is merged into the `cosmic-swingset-after-commit-stats` record.
#[async_trait]
pub trait AfterCommitHook: Send + Sync {
    async fn after_commit(&self, block_height: u64, block_time: u64)
    -> anyhow::Result<Map<String, Value>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAfterCommit;

#[async_trait]
impl AfterCommitHook for NoAfterCommit {
    async fn after_commit(&self, _: u64, _: u64) -> anyhow::Result<Map<String, Value>> {
        Ok(Map::new())
    }
}

/// Applies a chain software upgrade plan during AG_COSMOS_INIT.
#[async_trait]
pub trait UpgradeHook: Send + Sync {
    async fn apply(&self, plan: &UpgradePlan, block_time: u64) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpgrade;

#[async_trait]
impl UpgradeHook for NoUpgrade {
    async fn apply(&self, plan: &UpgradePlan, _block_time: u64) -> anyhow::Result<()> {
        tracing::info!(name = %plan.name, height = plan.height, "no upgrade handler installed");
        Ok(())
    }
}
