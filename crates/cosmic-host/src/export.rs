//! Serialized export of kernel state changes.
//!
//! The kernel reports state changes synchronously after each run. The
//! [`ExportQueue`] hands those batches to a single worker task so a slow
//! sink never blocks the kernel and batches are always exported in the order
//! they were produced.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use cosmic_kernel::{ExportCallback, ExportUpdate};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Destination for exported kernel state.
pub trait ExportSink: Send + 'static {
    fn export(&mut self, batch: Vec<ExportUpdate>) -> anyhow::Result<()>;
}

impl<F> ExportSink for F
where
    F: FnMut(Vec<ExportUpdate>) -> anyhow::Result<()> + Send + 'static,
{
    fn export(&mut self, batch: Vec<ExportUpdate>) -> anyhow::Result<()> {
        self(batch)
    }
}

/// In-memory export sink; clones share the exported view.
#[derive(Debug, Clone, Default)]
pub struct MemExportSink {
    state: Arc<Mutex<BTreeMap<String, String>>>,
    batches: Arc<Mutex<u64>>,
}

impl MemExportSink {
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> u64 {
        *self.batches.lock().unwrap()
    }
}

impl ExportSink for MemExportSink {
    fn export(&mut self, batch: Vec<ExportUpdate>) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        for update in batch {
            match update.value {
                Some(value) => state.insert(update.key, value),
                None => state.remove(&update.key),
            };
        }
        *self.batches.lock().unwrap() += 1;
        Ok(())
    }
}

enum ExportMsg {
    Batch(Vec<ExportUpdate>),
    Flush(oneshot::Sender<Option<String>>),
}

#[derive(Debug)]
pub struct ExportQueue {
    tx: mpsc::UnboundedSender<ExportMsg>,
    worker: JoinHandle<()>,
}

impl ExportQueue {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(mut sink: impl ExportSink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ExportMsg>();
        let worker = tokio::spawn(async move {
            let mut failure: Option<String> = None;
            while let Some(msg) = rx.recv().await {
                match msg {
                    ExportMsg::Batch(batch) => {
                        let count = batch.len();
                        if let Err(err) = sink.export(batch) {
                            tracing::error!(error = %err, "kernel state export failed");
                            failure.get_or_insert_with(|| format!("{err:#}"));
                        } else {
                            tracing::trace!(count, "exported kernel state batch");
                        }
                    }
                    ExportMsg::Flush(resp) => {
                        let _ = resp.send(failure.take());
                    }
                }
            }
        });
        Self { tx, worker }
    }

    pub fn submit(&self, batch: Vec<ExportUpdate>) {
        if self.tx.send(ExportMsg::Batch(batch)).is_err() {
            tracing::error!("export worker is gone; dropping kernel state batch");
        }
    }

    /// Callback to install on the kernel; submits each batch to this queue.
    pub fn callback(&self) -> ExportCallback {
        let tx = self.tx.clone();
        Box::new(move |batch| {
            if tx.send(ExportMsg::Batch(batch)).is_err() {
                tracing::error!("export worker is gone; dropping kernel state batch");
            }
        })
    }

    /// Wait until every batch submitted so far has been exported. Reports
    /// the first failure since the previous flush.
    pub async fn flush(&self) -> Result<(), String> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ExportMsg::Flush(resp))
            .map_err(|_| "export worker is gone".to_string())?;
        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err("export worker is gone".to_string()),
        }
    }
}

impl Drop for ExportQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(key: &str, value: Option<&str>) -> ExportUpdate {
        ExportUpdate {
            key: key.into(),
            value: value.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn batches_apply_in_order() {
        let sink = MemExportSink::default();
        let queue = ExportQueue::spawn(sink.clone());
        queue.submit(vec![update("a", Some("1")), update("b", Some("2"))]);
        let mut callback = queue.callback();
        callback(vec![update("a", None), update("b", Some("3"))]);

        queue.flush().await.unwrap();
        assert_eq!(sink.batch_count(), 2);
        let state = sink.snapshot();
        assert_eq!(state.get("a"), None);
        assert_eq!(state.get("b").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn flush_reports_failures_once() {
        let queue = ExportQueue::spawn(|batch: Vec<ExportUpdate>| {
            if batch.is_empty() {
                anyhow::bail!("empty batch");
            }
            Ok(())
        });
        queue.submit(Vec::new());
        queue.submit(vec![update("k", Some("v"))]);
        let err = queue.flush().await.unwrap_err();
        assert!(err.contains("empty batch"));
        queue.flush().await.unwrap();
    }
}
