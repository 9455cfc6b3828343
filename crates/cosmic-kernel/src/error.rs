use thiserror::Error;

use crate::types::{BridgeId, KernelPromiseId};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel has been shut down")]
    ShutDown,
    #[error("no vat named '{0}'")]
    VatNotFound(String),
    #[error("duplicate vat name '{0}'")]
    DuplicateVat(String),
    #[error("unknown kernel promise {0}")]
    UnknownPromise(KernelPromiseId),
    #[error("kernel promise {0} is not settled")]
    PromiseUnsettled(KernelPromiseId),
    #[error("no handler registered for bridge '{0}'")]
    BridgeNotRegistered(BridgeId),
    #[error("mailbox device has no handler vat")]
    MailboxNotConfigured,
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
    #[error("kernel panic during crank: {0}")]
    Panic(String),
}
