//! Publishing the outcome of INSTALL_BUNDLE actions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chain_sends::ChainSendLog;

/// Result of one bundle installation, as published to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationRecord {
    pub endo_zip_base64_sha512: String,
    pub installed: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait InstallationPublisher: Send + Sync {
    async fn publish(&self, record: &InstallationRecord) -> anyhow::Result<()>;
}

/// Builds the publisher the first time a block is executed.
pub type PublisherFactory = Box<dyn FnOnce() -> Arc<dyn InstallationPublisher> + Send>;

pub const STORAGE_DESTINATION: &str = "storage";
pub const BUNDLES_KEY: &str = "published.bundles";

/// Appends each record to the chain's `published.bundles` storage path.
#[derive(Debug, Clone)]
pub struct ChainStoragePublisher {
    chain: ChainSendLog,
}

impl ChainStoragePublisher {
    pub fn new(chain: ChainSendLog) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl InstallationPublisher for ChainStoragePublisher {
    async fn publish(&self, record: &InstallationRecord) -> anyhow::Result<()> {
        let value = serde_json::to_string(record)?;
        self.chain.send_to_chain(
            STORAGE_DESTINATION,
            json!({ "method": "append", "args": [[BUNDLES_KEY, value]] }),
        );
        Ok(())
    }
}
