use cosmic_kernel::KernelError;
use cosmic_store::StoreError;
use thiserror::Error;

use crate::inbound_queue::QueueError;
use crate::params::ParamsError;

/// What kind of block-height inconsistency wedged the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoherenceKind {
    /// BEGIN_BLOCK for a height that had already begun executing.
    ReBegin,
    /// END_BLOCK without a BEGIN_BLOCK in the same cycle.
    EndWithoutBegin,
    /// END_BLOCK for a height other than the one that began.
    BeginMismatch,
    /// COMMIT_BLOCK for a height other than the one that ended.
    CommitMismatch,
    /// A height that is neither a replay nor the next block.
    StateReset,
    /// Re-sending the recorded chain sends did not reproduce them.
    ReplayFailed,
}

/// Fatal inconsistency between chain and kernel state. Once raised it is
/// returned by every later `blocking_send`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecoherenceError {
    pub kind: DecoherenceKind,
    pub message: String,
}

impl DecoherenceError {
    pub fn new(kind: DecoherenceKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("decohered: {0}")]
    Decohered(DecoherenceError),
    #[error("Unrecognized action {action_type}; are you sure you didn't mean to queue it?")]
    UnrecognizedAction { action_type: String },
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },
    #[error("invalid block params: {0}")]
    InvalidParams(#[from] ParamsError),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("export error: {0}")]
    Export(String),
    #[error("chain error: {0}")]
    Chain(String),
    #[error("block service has stopped")]
    ServiceStopped,
}

impl BlockError {
    pub fn decoherence(&self) -> Option<&DecoherenceError> {
        match self {
            BlockError::Decohered(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecoherenceError> for BlockError {
    fn from(err: DecoherenceError) -> Self {
        BlockError::Decohered(err)
    }
}
