//! Run policies decide, after each unit of kernel work, whether the kernel
//! keeps running.

use crate::types::CrankDetails;

/// Consulted by [`crate::KernelController::run`] after every crank.
///
/// Each method returns `true` to keep running and `false` to stop after the
/// current crank. Stopping never loses work: the next `run` resumes from the
/// head of the run-queue.
pub trait RunPolicy: Send {
    fn vat_created(&mut self) -> bool;
    fn crank_complete(&mut self, details: &CrankDetails) -> bool;
    fn crank_failed(&mut self) -> bool;
    fn empty_crank(&mut self) -> bool;
}

impl<P: RunPolicy + ?Sized> RunPolicy for Box<P> {
    fn vat_created(&mut self) -> bool {
        (**self).vat_created()
    }

    fn crank_complete(&mut self, details: &CrankDetails) -> bool {
        (**self).crank_complete(details)
    }

    fn crank_failed(&mut self) -> bool {
        (**self).crank_failed()
    }

    fn empty_crank(&mut self) -> bool {
        (**self).empty_crank()
    }
}
