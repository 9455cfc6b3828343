//! Bridge device: named channels between the chain and handler vats.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::KernelError;
use crate::types::{BridgeId, ObjectRef};

/// Synchronous outbound path from vats to the chain.
pub trait BridgeOutbound: Send {
    fn send(&mut self, bridge: BridgeId, message: &Value) -> Value;
}

#[derive(Default)]
pub struct BridgeDevice {
    handlers: BTreeMap<BridgeId, ObjectRef>,
    outbound: Option<Box<dyn BridgeOutbound>>,
}

impl fmt::Debug for BridgeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeDevice")
            .field("handlers", &self.handlers)
            .field("outbound", &self.outbound.is_some())
            .finish()
    }
}

impl BridgeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, bridge: BridgeId, handler: ObjectRef) {
        self.handlers.insert(bridge, handler);
    }

    pub fn set_outbound(&mut self, outbound: Box<dyn BridgeOutbound>) {
        self.outbound = Some(outbound);
    }

    /// Object that receives inbound events for `bridge`.
    pub fn handler(&self, bridge: BridgeId) -> Result<&ObjectRef, KernelError> {
        self.handlers
            .get(&bridge)
            .ok_or(KernelError::BridgeNotRegistered(bridge))
    }

    /// Send `message` to the chain. Without an outbound sink the call is
    /// dropped and answers `null`.
    pub fn send_outbound(&mut self, bridge: BridgeId, message: &Value) -> Value {
        match self.outbound.as_mut() {
            Some(outbound) => outbound.send(bridge, message),
            None => {
                log::warn!("bridge {bridge}: no outbound sink, dropping send");
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Echo;

    impl BridgeOutbound for Echo {
        fn send(&mut self, bridge: BridgeId, message: &Value) -> Value {
            json!({ "bridge": bridge.as_str(), "echo": message })
        }
    }

    #[test]
    fn unregistered_bridge_is_an_error() {
        let device = BridgeDevice::new();
        assert!(matches!(
            device.handler(BridgeId::Bank),
            Err(KernelError::BridgeNotRegistered(BridgeId::Bank))
        ));
    }

    #[test]
    fn outbound_goes_through_sink() {
        let mut device = BridgeDevice::new();
        assert_eq!(device.send_outbound(BridgeId::Core, &json!(1)), Value::Null);

        device.set_outbound(Box::new(Echo));
        let reply = device.send_outbound(BridgeId::Core, &json!({"n": 1}));
        assert_eq!(reply, json!({"bridge": "core", "echo": {"n": 1}}));
    }
}
