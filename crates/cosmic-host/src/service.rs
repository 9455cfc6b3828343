//! Task owning a [`BlockManager`], fed over a channel.
//!
//! The chain integration layer may call in from several tasks; the service
//! loop handles one message at a time, so at most one action is in flight.

use cosmic_kernel::KernelController;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::action::Action;
use crate::block_manager::{ActionOutcome, BlockManager};
use crate::error::BlockError;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
pub enum ServiceMsg {
    Send {
        action: Action,
        resp: oneshot::Sender<Result<ActionOutcome, BlockError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), BlockError>>,
    },
}

/// Cloneable handle to a running [`BlockService`].
#[derive(Debug, Clone)]
pub struct BlockClient {
    tx: mpsc::Sender<ServiceMsg>,
}

impl BlockClient {
    pub async fn blocking_send(&self, action: Action) -> Result<ActionOutcome, BlockError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ServiceMsg::Send { action, resp })
            .await
            .map_err(|_| BlockError::ServiceStopped)?;
        rx.await.map_err(|_| BlockError::ServiceStopped)?
    }

    /// Stop the service after the in-flight action, shutting the kernel
    /// down.
    pub async fn shutdown(&self) -> Result<(), BlockError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ServiceMsg::Shutdown { resp })
            .await
            .map_err(|_| BlockError::ServiceStopped)?;
        rx.await.map_err(|_| BlockError::ServiceStopped)?
    }
}

pub struct BlockService<K> {
    manager: BlockManager<K>,
    rx: mpsc::Receiver<ServiceMsg>,
}

impl<K: KernelController + 'static> BlockService<K> {
    /// Move `manager` into a new task and return a handle to it. The task
    /// ends on `shutdown` or when every client has been dropped.
    pub fn spawn(manager: BlockManager<K>) -> (BlockClient, JoinHandle<BlockManager<K>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let service = Self { manager, rx };
        let handle = tokio::spawn(service.run());
        (BlockClient { tx }, handle)
    }

    async fn run(mut self) -> BlockManager<K> {
        tracing::info!(saved_height = self.manager.saved_height(), "block service started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ServiceMsg::Send { action, resp } => {
                    let action_type = action.action_type().to_string();
                    tracing::debug!(action_type = %action_type, "received action");
                    let result = self.manager.blocking_send(action).await;
                    if resp.send(result).is_err() {
                        tracing::warn!(action_type = %action_type, "caller went away before the reply");
                    }
                }
                ServiceMsg::Shutdown { resp } => {
                    tracing::info!("shutdown requested via control channel");
                    let _ = resp.send(self.manager.shutdown().await);
                    break;
                }
            }
        }
        tracing::info!(saved_height = self.manager.saved_height(), "block service stopped");
        self.manager
    }
}
