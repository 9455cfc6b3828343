//! Request/response helper over [`KernelController`].
//!
//! Queues a message, runs the kernel unbounded until the run-queue drains,
//! then reads back the result promise. Only meant for use outside a block:
//! setup, tests and operator tooling.

use cosmic_kernel::{KernelController, KernelError, KernelPromiseId, ObjectRef, PromiseStatus};
use serde_json::Value;
use thiserror::Error;

use crate::run_policy::never_stop;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("{kpid} was rejected: {reason}")]
    Rejected { kpid: KernelPromiseId, reason: Value },
    #[error("{0} is still unresolved after the run-queue drained")]
    Unsettled(KernelPromiseId),
}

pub struct KernelClient<'a, K> {
    kernel: &'a mut K,
}

impl<'a, K: KernelController> KernelClient<'a, K> {
    pub fn new(kernel: &'a mut K) -> Self {
        Self { kernel }
    }

    /// Call `method` on the root object of `vat` and wait for the answer.
    pub async fn call(&mut self, vat: &str, method: &str, args: Value) -> Result<Value, ClientError> {
        let kpid = self.kernel.queue_to_vat_root(vat, method, args)?;
        self.settle(kpid).await
    }

    pub async fn send_to(
        &mut self,
        target: &ObjectRef,
        method: &str,
        args: Value,
    ) -> Result<Value, ClientError> {
        let kpid = self.kernel.queue_to_vat_object(target, method, args)?;
        self.settle(kpid).await
    }

    /// Queue a message without running the kernel.
    pub fn send_only(
        &mut self,
        target: &ObjectRef,
        method: &str,
        args: Value,
    ) -> Result<KernelPromiseId, ClientError> {
        Ok(self.kernel.queue_to_vat_object(target, method, args)?)
    }

    async fn settle(&mut self, kpid: KernelPromiseId) -> Result<Value, ClientError> {
        let mut policy = never_stop();
        self.kernel.run(&mut policy).await?;
        match self.kernel.kp_status(&kpid)? {
            PromiseStatus::Fulfilled => Ok(self.kernel.kp_resolution(&kpid)?),
            PromiseStatus::Rejected => {
                let reason = self.kernel.kp_resolution(&kpid)?;
                Err(ClientError::Rejected { kpid, reason })
            }
            PromiseStatus::Unresolved => Err(ClientError::Unsettled(kpid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use cosmic_kernel::{SimKernel, VatFault, vat_fn};
    use serde_json::json;

    use super::*;

    fn kernel() -> SimKernel {
        SimKernel::builder()
            .vat(
                "echo",
                vat_fn(|_ctx, _target, method, args| match method {
                    "echo" => Ok(args.clone()),
                    _ => Err(VatFault::new(format!("no method {method}"))),
                }),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn call_returns_the_fulfilment() {
        let mut kernel = kernel();
        let mut client = KernelClient::new(&mut kernel);
        let answer = client.call("echo", "echo", json!([1, 2])).await.unwrap();
        assert_eq!(answer, json!([1, 2]));
    }

    #[tokio::test]
    async fn rejection_is_an_error() {
        let mut kernel = kernel();
        let mut client = KernelClient::new(&mut kernel);
        let err = client
            .send_to(&ObjectRef::root("echo"), "shout", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected { .. }));
    }

    #[tokio::test]
    async fn send_only_leaves_the_message_queued() {
        let mut kernel = kernel();
        let kpid = KernelClient::new(&mut kernel)
            .send_only(&ObjectRef::root("echo"), "echo", json!([]))
            .unwrap();
        assert_eq!(kernel.run_queue_length(), 1);
        assert_eq!(kernel.kp_status(&kpid).unwrap(), PromiseStatus::Unresolved);
    }
}
