//! Kernel boundary for the block manager: the controller trait the host
//! drives, run policies, kernel value types, and a deterministic in-memory
//! kernel with timer, mailbox and bridge devices.

pub mod bundle;
pub mod controller;
pub mod devices;
pub mod error;
pub mod policy;
pub mod run_queue;
pub mod sim;
pub mod types;
pub mod vat;

pub use bundle::{make_bundle, validate_bundle};
pub use controller::KernelController;
pub use devices::{
    BridgeDevice, BridgeOutbound, MailboxDevice, MailboxStorage, PeerMailbox, TimerDevice,
};
pub use error::KernelError;
pub use policy::RunPolicy;
pub use sim::{ExportCallback, SimKernel, SimKernelBuilder};
pub use types::{
    BridgeId, Bundle, BundleId, CrankDetails, ExportUpdate, KernelPromiseId, KernelStats,
    MailboxMessage, ObjectRef, PromiseStatus,
};
pub use vat::{Vat, VatContext, VatFault, vat_fn};
