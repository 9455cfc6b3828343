//! A self-contained node: filesystem stores, the in-memory kernel with a
//! demo handler vat, and a block service, driven by a JSON-lines script.
//!
//! Script lines are either a bare lifecycle action, handed to
//! `blocking_send`, or a queue envelope that the chain side would push:
//!
//! ```json
//! {"type": "BEGIN_BLOCK", "blockHeight": 1, "blockTime": 10, "params": {...}}
//! {"queue": "normal", "action": {"type": "CORE_EVAL"}, "context": {"blockHeight": 1, "txHash": "AB", "msgIdx": 0}}
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cosmic_kernel::{
    BridgeId, ExportUpdate, KernelError, ObjectRef, SimKernel, VatContext, VatFault, vat_fn,
};
use cosmic_store::{FsHostStore, HostStorage, KvStore};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

use crate::action::{Action, InboundContext, QueueEntry};
use crate::block_manager::{ActionOutcome, BlockManager};
use crate::chain_sends::{ChainSendLog, MailboxChainStorage};
use crate::config::HostConfig;
use crate::export::ExportQueue;
use crate::inbound_queue::InboundQueue;
use crate::installation::{ChainStoragePublisher, InstallationPublisher};
use crate::launch::{LaunchOptions, launch};
use crate::service::{BlockClient, BlockService};

pub const HOST_DIR: &str = "host";
pub const ACTION_QUEUE_DIR: &str = "action-queue";
pub const HIGH_PRIORITY_QUEUE_DIR: &str = "high-priority-queue";
pub const EXPORT_DIR: &str = "export";

/// Name of the vat that handles every device in the demo kernel.
pub const DEMO_VAT: &str = "bootstrap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    High,
    Normal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEnvelope {
    queue: QueueName,
    action: Action,
    context: InboundContext,
}

#[derive(Debug)]
pub enum ScriptLine {
    Queue { queue: QueueName, entry: QueueEntry },
    Send(Action),
}

impl ScriptLine {
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line).context("script line is not JSON")?;
        if value.get("queue").is_some() {
            let envelope: QueueEnvelope =
                serde_json::from_value(value).context("invalid queue envelope")?;
            return Ok(ScriptLine::Queue {
                queue: envelope.queue,
                entry: QueueEntry {
                    action: envelope.action,
                    context: envelope.context,
                },
            });
        }
        Ok(ScriptLine::Send(
            Action::from_value(value).context("invalid action")?,
        ))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptSummary {
    pub sent: u64,
    pub queued: u64,
}

pub struct Node {
    pub client: BlockClient,
    pub service: JoinHandle<BlockManager<SimKernel>>,
    pub action_queue: InboundQueue,
    pub high_priority_queue: InboundQueue,
    pub chain_sends: ChainSendLog,
    pub dir: PathBuf,
}

impl Node {
    /// Open (or create) a node under `dir` and start its block service.
    /// Must be called inside a tokio runtime.
    pub fn open(dir: &Path, config: HostConfig) -> Result<Self> {
        let host = open_store(dir, HOST_DIR)?;
        let action_queue = open_store(dir, ACTION_QUEUE_DIR)?;
        let high_priority_queue = open_store(dir, HIGH_PRIORITY_QUEUE_DIR)?;
        let export_store = open_store(dir, EXPORT_DIR)?;

        let chain_sends = ChainSendLog::detached();
        let mailbox_storage = MailboxChainStorage::new(chain_sends.clone());
        let export_queue = ExportQueue::spawn(move |batch: Vec<ExportUpdate>| -> Result<()> {
            for update in batch {
                match update.value {
                    Some(value) => export_store.set(&update.key, &value)?,
                    None => export_store.delete(&update.key)?,
                }
            }
            export_store.commit()?;
            Ok(())
        });

        let kernel = demo_kernel(&chain_sends, mailbox_storage.clone(), &export_queue)
            .context("building kernel")?;
        let publisher_chain = chain_sends.clone();
        let options = LaunchOptions::new(
            kernel,
            Arc::new(host),
            Arc::new(action_queue),
            Arc::new(high_priority_queue),
        )
        .chain_sends(chain_sends.clone())
        .chain_storage(Arc::new(mailbox_storage))
        .export_queue(export_queue)
        .publisher_factory(Box::new(move || -> Arc<dyn InstallationPublisher> {
            Arc::new(ChainStoragePublisher::new(publisher_chain))
        }))
        .config(config);

        let launched = launch(options).context("launching block manager")?;
        let (client, service) = BlockService::spawn(launched.manager);
        Ok(Self {
            client,
            service,
            action_queue: launched.action_queue,
            high_priority_queue: launched.high_priority_queue,
            chain_sends,
            dir: dir.to_path_buf(),
        })
    }

    /// Feed every line of `reader` to the node, stopping at the first
    /// failure.
    pub async fn run_script<R>(&self, reader: R) -> Result<ScriptSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut summary = ScriptSummary::default();
        let mut line_no = 0u64;
        while let Some(line) = lines.next_line().await.context("reading script")? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ScriptLine::parse(line).with_context(|| format!("line {line_no}"))? {
                ScriptLine::Queue { queue, entry } => {
                    let target = match queue {
                        QueueName::High => &self.high_priority_queue,
                        QueueName::Normal => &self.action_queue,
                    };
                    target
                        .push(&entry)
                        .with_context(|| format!("line {line_no}: queueing action"))?;
                    tracing::debug!(inbound_num = %entry.context, ?queue, "queued action");
                    summary.queued += 1;
                }
                ScriptLine::Send(action) => {
                    let action_type = action.action_type().to_string();
                    let outcome = self
                        .client
                        .blocking_send(action)
                        .await
                        .with_context(|| format!("line {line_no}: {action_type}"))?;
                    if outcome == ActionOutcome::Initialized {
                        tracing::info!("node initialized");
                    }
                    summary.sent += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Stop the service and return the manager it owned.
    pub async fn shutdown(self) -> Result<BlockManager<SimKernel>> {
        self.client.shutdown().await.context("shutting down")?;
        self.service.await.context("block service task failed")
    }
}

fn open_store(dir: &Path, name: &str) -> Result<FsHostStore> {
    let path = dir.join(name);
    FsHostStore::open(&path).with_context(|| format!("opening store {}", path.display()))
}

/// Kernel with a single vat handling the mailbox and every bridge.
pub fn demo_kernel(
    chain_sends: &ChainSendLog,
    mailbox_storage: MailboxChainStorage,
    export_queue: &ExportQueue,
) -> Result<SimKernel, KernelError> {
    let root = ObjectRef::root(DEMO_VAT);
    let mut builder = SimKernel::builder()
        .vat(DEMO_VAT, vat_fn(demo_vat))
        .mailbox_handler(root.clone())
        .bridge_outbound(Box::new(chain_sends.clone()))
        .mailbox_storage(Box::new(mailbox_storage))
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
    builder.build()
}

/// Echoes inbound mail and records every bridge event in chain storage.
fn demo_vat(
    ctx: &mut VatContext<'_>,
    _target: &ObjectRef,
    method: &str,
    args: &Value,
) -> Result<Value, VatFault> {
    match method {
        "deliverInboundMessages" => {
            let peer = args["peer"]
                .as_str()
                .ok_or_else(|| VatFault::new("deliverInboundMessages without peer"))?;
            let messages = args["messages"].as_array().cloned().unwrap_or_default();
            for message in &messages {
                let body = message[1].as_str().unwrap_or_default();
                ctx.charge(body.len() as u64);
                ctx.mailbox_send(peer, format!("re: {body}"));
            }
            Ok(json!(messages.len()))
        }
        "deliverInboundAck" => Ok(Value::Null),
        "inbound" => {
            let source = args[0].as_str().unwrap_or("unknown");
            let reply = ctx.bridge_send(
                BridgeId::Storage,
                &json!({
                    "method": "append",
                    "args": [[format!("published.{source}"), args[1].to_string()]],
                }),
            );
            Ok(reply)
        }
        "wake" => Ok(Value::Null),
        other => Err(VatFault::new(format!("{DEMO_VAT} has no method {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_lines_split_into_sends_and_queue_pushes() {
        let send = ScriptLine::parse(r#"{"type":"END_BLOCK","blockHeight":3,"blockTime":9}"#)
            .unwrap();
        assert!(matches!(send, ScriptLine::Send(Action::EndBlock(_))));

        let queued = ScriptLine::parse(
            r#"{"queue":"high","action":{"type":"CORE_EVAL","evals":[]},"context":{"blockHeight":3,"txHash":"AA","msgIdx":1}}"#,
        )
        .unwrap();
        let ScriptLine::Queue { queue, entry } = queued else {
            panic!("expected queue line");
        };
        assert_eq!(queue, QueueName::High);
        assert_eq!(entry.context.inbound_num(), "3-AA-1");
    }

    #[test]
    fn bad_queue_name_is_rejected() {
        let err = ScriptLine::parse(
            r#"{"queue":"urgent","action":{"type":"CORE_EVAL"},"context":{"blockHeight":1,"txHash":"A","msgIdx":0}}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("queue envelope"));
    }
}
