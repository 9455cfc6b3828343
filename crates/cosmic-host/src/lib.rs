//! Block manager coupling a deterministic kernel to a BFT chain's block
//! lifecycle: queued inbound actions, per-block compute budgets, crash-safe
//! height bookkeeping and chain-send replay.

pub mod action;
pub mod block_manager;
pub mod chain_sends;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod hooks;
pub mod inbound_queue;
pub mod installation;
pub mod launch;
pub mod metrics;
pub mod node;
pub mod params;
pub mod run_policy;
pub mod service;
pub mod slog;

pub use action::{Action, InboundContext, QueueEntry};
pub use block_manager::{ActionOutcome, BlockManager};
pub use chain_sends::{ChainOutbound, ChainSend, ChainSendLog, ChainStorage, MailboxChainStorage};
pub use client::{ClientError, KernelClient};
pub use config::HostConfig;
pub use error::{BlockError, DecoherenceError, DecoherenceKind};
pub use export::{ExportQueue, ExportSink, MemExportSink};
pub use hooks::{AfterCommitHook, UpgradeHook};
pub use inbound_queue::{ConsumedMarker, InboundQueue, QueueError};
pub use installation::{InstallationPublisher, InstallationRecord};
pub use launch::{LaunchOptions, Launched, launch};
pub use params::{BeansPerUnit, BlockParams};
pub use run_policy::{Beans, ChainRunPolicy, MeteredRunPolicy, NeverStop, never_stop};
pub use service::{BlockClient, BlockService};
