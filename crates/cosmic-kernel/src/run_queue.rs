use std::collections::VecDeque;

use serde_json::Value;

use crate::types::{KernelPromiseId, ObjectRef};
use crate::vat::Vat;

/// A message waiting for delivery.
#[derive(Debug, Clone)]
pub struct Message {
    pub target: ObjectRef,
    pub method: String,
    pub args: Value,
    /// Promise settled with the delivery result, if anyone asked for one.
    pub result: Option<KernelPromiseId>,
}

pub enum RunQueueItem {
    Send(Message),
    CreateVat { name: String, vat: Box<dyn Vat> },
}

impl RunQueueItem {
    pub fn describe(&self) -> String {
        match self {
            RunQueueItem::Send(msg) => format!("send {}.{}", msg.target, msg.method),
            RunQueueItem::CreateVat { name, .. } => format!("create-vat {name}"),
        }
    }
}

#[derive(Default)]
pub struct RunQueue {
    items: VecDeque<RunQueueItem>,
    pending_vats: Vec<String>,
}

impl RunQueue {
    pub fn push_send(&mut self, message: Message) {
        self.items.push_back(RunQueueItem::Send(message));
    }

    pub fn push_create_vat(&mut self, name: String, vat: Box<dyn Vat>) {
        self.pending_vats.push(name.clone());
        self.items.push_back(RunQueueItem::CreateVat { name, vat });
    }

    pub fn pop(&mut self) -> Option<RunQueueItem> {
        let item = self.items.pop_front()?;
        if let RunQueueItem::CreateVat { name, .. } = &item {
            if let Some(pos) = self.pending_vats.iter().position(|n| n == name) {
                self.pending_vats.remove(pos);
            }
        }
        Some(item)
    }

    /// Whether a vat named `name` is waiting to be created.
    pub fn has_pending_vat(&self, name: &str) -> bool {
        self.pending_vats.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
