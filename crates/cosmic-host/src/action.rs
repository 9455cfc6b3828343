//! Chain actions as they arrive from the consensus layer.
//!
//! Actions travel as JSON objects with a `type` tag. Lifecycle actions are
//! handed to `blocking_send`; delivery actions are queued and dispatched
//! during END_BLOCK. Bridge actions keep their whole JSON body, tag
//! included, since that body is forwarded to the handler vat unchanged.

use std::fmt;

use cosmic_kernel::MailboxMessage;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub mod action_type {
    pub const AG_COSMOS_INIT: &str = "AG_COSMOS_INIT";
    pub const BEGIN_BLOCK: &str = "BEGIN_BLOCK";
    pub const END_BLOCK: &str = "END_BLOCK";
    pub const COMMIT_BLOCK: &str = "COMMIT_BLOCK";
    pub const AFTER_COMMIT_BLOCK: &str = "AFTER_COMMIT_BLOCK";
    pub const DELIVER_INBOUND: &str = "DELIVER_INBOUND";
    pub const VBANK_BALANCE_UPDATE: &str = "VBANK_BALANCE_UPDATE";
    pub const IBC_EVENT: &str = "IBC_EVENT";
    pub const PLEASE_PROVISION: &str = "PLEASE_PROVISION";
    pub const INSTALL_BUNDLE: &str = "INSTALL_BUNDLE";
    pub const CORE_EVAL: &str = "CORE_EVAL";
    pub const WALLET_ACTION: &str = "WALLET_ACTION";
    pub const WALLET_SPEND_ACTION: &str = "WALLET_SPEND_ACTION";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePlan {
    pub name: String,
    pub height: u64,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmosInit {
    #[serde(default)]
    pub is_bootstrap: bool,
    pub block_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_plan: Option<UpgradePlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginBlock {
    pub block_height: u64,
    pub block_time: u64,
    pub params: Value,
}

/// Height and time carried by END, COMMIT and AFTER_COMMIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub block_height: u64,
    #[serde(default)]
    pub block_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverInbound {
    pub peer: String,
    pub messages: Vec<MailboxMessage>,
    pub ack: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallBundle {
    /// Bundle JSON as submitted on chain; parsed at dispatch time.
    pub bundle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CosmosInit(CosmosInit),
    BeginBlock(BeginBlock),
    EndBlock(BlockHeader),
    CommitBlock(BlockHeader),
    AfterCommitBlock(BlockHeader),
    DeliverInbound(DeliverInbound),
    VbankBalanceUpdate(Value),
    IbcEvent(Value),
    PleaseProvision(Value),
    InstallBundle(InstallBundle),
    CoreEval(Value),
    WalletAction(Value),
    WalletSpendAction(Value),
    /// Any `type` this host does not know; rejected at dispatch.
    Unknown { action_type: String, body: Value },
}

impl Action {
    pub fn action_type(&self) -> &str {
        use action_type::*;
        match self {
            Action::CosmosInit(_) => AG_COSMOS_INIT,
            Action::BeginBlock(_) => BEGIN_BLOCK,
            Action::EndBlock(_) => END_BLOCK,
            Action::CommitBlock(_) => COMMIT_BLOCK,
            Action::AfterCommitBlock(_) => AFTER_COMMIT_BLOCK,
            Action::DeliverInbound(_) => DELIVER_INBOUND,
            Action::VbankBalanceUpdate(_) => VBANK_BALANCE_UPDATE,
            Action::IbcEvent(_) => IBC_EVENT,
            Action::PleaseProvision(_) => PLEASE_PROVISION,
            Action::InstallBundle(_) => INSTALL_BUNDLE,
            Action::CoreEval(_) => CORE_EVAL,
            Action::WalletAction(_) => WALLET_ACTION,
            Action::WalletSpendAction(_) => WALLET_SPEND_ACTION,
            Action::Unknown { action_type, .. } => action_type.as_str(),
        }
    }

    /// Build a bridge action, stamping `type` into its body.
    pub fn bridge(action_type: &str, body: Value) -> Result<Self, serde_json::Error> {
        let mut body = match body {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "bridge action body must be an object, got {other}"
                )));
            }
        };
        body.insert("type".into(), Value::String(action_type.to_string()));
        serde_json::from_value(Value::Object(body))
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let (action_type, payload) = match self {
            Action::CosmosInit(p) => (self.action_type(), serde_json::to_value(p)?),
            Action::BeginBlock(p) => (self.action_type(), serde_json::to_value(p)?),
            Action::EndBlock(p) | Action::CommitBlock(p) | Action::AfterCommitBlock(p) => {
                (self.action_type(), serde_json::to_value(p)?)
            }
            Action::DeliverInbound(p) => (self.action_type(), serde_json::to_value(p)?),
            Action::InstallBundle(p) => (self.action_type(), serde_json::to_value(p)?),
            Action::VbankBalanceUpdate(body)
            | Action::IbcEvent(body)
            | Action::PleaseProvision(body)
            | Action::CoreEval(body)
            | Action::WalletAction(body)
            | Action::WalletSpendAction(body)
            | Action::Unknown { body, .. } => (self.action_type(), body.clone()),
        };
        let mut map = match payload {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("type".into(), Value::String(action_type.to_string()));
        Ok(Value::Object(map))
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        use action_type::*;
        let action_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| serde_json::Error::missing_field("type"))?
            .to_string();
        let action = match action_type.as_str() {
            AG_COSMOS_INIT => Action::CosmosInit(serde_json::from_value(value)?),
            BEGIN_BLOCK => Action::BeginBlock(serde_json::from_value(value)?),
            END_BLOCK => Action::EndBlock(serde_json::from_value(value)?),
            COMMIT_BLOCK => Action::CommitBlock(serde_json::from_value(value)?),
            AFTER_COMMIT_BLOCK => Action::AfterCommitBlock(serde_json::from_value(value)?),
            DELIVER_INBOUND => Action::DeliverInbound(serde_json::from_value(value)?),
            INSTALL_BUNDLE => Action::InstallBundle(serde_json::from_value(value)?),
            VBANK_BALANCE_UPDATE => Action::VbankBalanceUpdate(value),
            IBC_EVENT => Action::IbcEvent(value),
            PLEASE_PROVISION => Action::PleaseProvision(value),
            CORE_EVAL => Action::CoreEval(value),
            WALLET_ACTION => Action::WalletAction(value),
            WALLET_SPEND_ACTION => Action::WalletSpendAction(value),
            _ => Action::Unknown {
                action_type,
                body: value,
            },
        };
        Ok(action)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(<S::Error as serde::ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Action::from_value(value).map_err(D::Error::custom)
    }
}

/// Where a queued action came from on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundContext {
    pub block_height: u64,
    pub tx_hash: String,
    pub msg_idx: u64,
}

impl InboundContext {
    /// Correlation id used in logs and slog records.
    pub fn inbound_num(&self) -> String {
        format!("{}-{}-{}", self.block_height, self.tx_hash, self.msg_idx)
    }
}

impl fmt::Display for InboundContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inbound_num())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub action: Action,
    pub context: InboundContext,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lifecycle_actions_parse_from_chain_json() {
        let begin: Action = serde_json::from_value(json!({
            "type": "BEGIN_BLOCK",
            "blockHeight": 7,
            "blockTime": 1700,
            "params": {"beans_per_unit": []},
        }))
        .unwrap();
        match begin {
            Action::BeginBlock(b) => {
                assert_eq!(b.block_height, 7);
                assert_eq!(b.block_time, 1700);
            }
            other => panic!("unexpected {other:?}"),
        }

        let init: Action = serde_json::from_value(json!({
            "type": "AG_COSMOS_INIT",
            "isBootstrap": true,
            "blockTime": 5,
            "upgradePlan": {"name": "v2", "height": 10},
        }))
        .unwrap();
        let Action::CosmosInit(init) = init else {
            panic!("expected init");
        };
        assert!(init.is_bootstrap);
        assert_eq!(init.upgrade_plan.unwrap().height, 10);
    }

    #[test]
    fn bridge_body_is_kept_whole() {
        let raw = json!({"type": "VBANK_BALANCE_UPDATE", "nonce": 3, "updated": []});
        let action: Action = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(action.action_type(), "VBANK_BALANCE_UPDATE");
        assert_eq!(serde_json::to_value(&action).unwrap(), raw);
    }

    #[test]
    fn unknown_type_is_preserved() {
        let action: Action =
            serde_json::from_value(json!({"type": "SWING_STORE_EXPORT", "x": 1})).unwrap();
        assert_eq!(action.action_type(), "SWING_STORE_EXPORT");
        assert!(matches!(action, Action::Unknown { .. }));
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(serde_json::from_value::<Action>(json!({"blockHeight": 1})).is_err());
    }

    #[test]
    fn deliver_inbound_messages_are_pairs() {
        let action: Action = serde_json::from_value(json!({
            "type": "DELIVER_INBOUND",
            "peer": "agoric1abc",
            "messages": [[1, "hello"], [2, "world"]],
            "ack": 0,
        }))
        .unwrap();
        let Action::DeliverInbound(deliver) = action else {
            panic!("expected deliver");
        };
        assert_eq!(deliver.messages[1], (2, "world".to_string()));
    }

    #[test]
    fn inbound_num_joins_context_fields() {
        let ctx = InboundContext {
            block_height: 12,
            tx_hash: "ABCD".into(),
            msg_idx: 3,
        };
        assert_eq!(ctx.inbound_num(), "12-ABCD-3");
        assert_eq!(
            Action::bridge("CORE_EVAL", json!({"evals": []}))
                .unwrap()
                .action_type(),
            "CORE_EVAL"
        );
    }
}
