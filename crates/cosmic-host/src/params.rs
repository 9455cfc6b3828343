//! BEGIN_BLOCK params.
//!
//! The chain sends prices as a list of `{key, beans}` pairs with decimal
//! string amounts:
//!
//! ```json
//! {"beans_per_unit": [{"key": "blockComputeLimit", "beans": "65000000"}, ...]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::run_policy::Beans;

pub const BLOCK_COMPUTE_LIMIT: &str = "blockComputeLimit";
pub const VAT_CREATION: &str = "vatCreation";
pub const XSNAP_COMPUTRON: &str = "xsnapComputron";

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("malformed params: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("beansPerUnit.{key} is missing")]
    Missing { key: &'static str },
    #[error("beansPerUnit.{key} = {value:?} is not a non-negative integer")]
    BadAmount { key: String, value: String },
}

#[derive(Debug, Deserialize)]
struct RawParams {
    beans_per_unit: Vec<RawBeans>,
}

#[derive(Debug, Deserialize)]
struct RawBeans {
    key: String,
    beans: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeansPerUnit {
    pub block_compute_limit: Beans,
    pub vat_creation: Beans,
    pub xsnap_computron: Beans,
}

/// Parameters in force from BEGIN_BLOCK until COMMIT_BLOCK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockParams {
    pub beans_per_unit: BeansPerUnit,
}

impl BlockParams {
    pub fn parse(params: &Value) -> Result<Self, ParamsError> {
        let raw = RawParams::deserialize(params)?;
        let mut limit = None;
        let mut vat_creation = None;
        let mut xsnap = None;
        for entry in raw.beans_per_unit {
            let amount: Beans = entry.beans.parse().map_err(|_| ParamsError::BadAmount {
                key: entry.key.clone(),
                value: entry.beans.clone(),
            })?;
            match entry.key.as_str() {
                BLOCK_COMPUTE_LIMIT => limit = Some(amount),
                VAT_CREATION => vat_creation = Some(amount),
                XSNAP_COMPUTRON => xsnap = Some(amount),
                other => tracing::debug!(key = other, "ignoring unknown beansPerUnit entry"),
            }
        }
        Ok(BlockParams {
            beans_per_unit: BeansPerUnit {
                block_compute_limit: limit.ok_or(ParamsError::Missing {
                    key: BLOCK_COMPUTE_LIMIT,
                })?,
                vat_creation: vat_creation.ok_or(ParamsError::Missing { key: VAT_CREATION })?,
                xsnap_computron: xsnap.ok_or(ParamsError::Missing {
                    key: XSNAP_COMPUTRON,
                })?,
            },
        })
    }
}

/// Encode prices in the chain's params format.
pub fn encode_params(beans_per_unit: &BeansPerUnit) -> Value {
    serde_json::json!({
        "beans_per_unit": [
            {"key": BLOCK_COMPUTE_LIMIT, "beans": beans_per_unit.block_compute_limit.to_string()},
            {"key": VAT_CREATION, "beans": beans_per_unit.vat_creation.to_string()},
            {"key": XSNAP_COMPUTRON, "beans": beans_per_unit.xsnap_computron.to_string()},
        ]
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_all_three_prices() {
        let params = json!({
            "beans_per_unit": [
                {"key": "blockComputeLimit", "beans": "65000000"},
                {"key": "vatCreation", "beans": "300000"},
                {"key": "xsnapComputron", "beans": "100"},
                {"key": "feeUnit", "beans": "1000000000000"},
            ]
        });
        let parsed = BlockParams::parse(&params).unwrap();
        assert_eq!(parsed.beans_per_unit.block_compute_limit, Beans(65_000_000));
        assert_eq!(parsed.beans_per_unit.vat_creation, Beans(300_000));
        assert_eq!(parsed.beans_per_unit.xsnap_computron, Beans(100));
        assert_eq!(
            BlockParams::parse(&encode_params(&parsed.beans_per_unit)).unwrap(),
            parsed
        );
    }

    #[test]
    fn missing_price_is_rejected() {
        let params = json!({
            "beans_per_unit": [
                {"key": "blockComputeLimit", "beans": "1"},
                {"key": "vatCreation", "beans": "1"},
            ]
        });
        assert!(matches!(
            BlockParams::parse(&params),
            Err(ParamsError::Missing { key: XSNAP_COMPUTRON })
        ));
    }

    #[test]
    fn negative_or_fractional_amounts_are_rejected() {
        for bad in ["-1", "1.5", "lots"] {
            let params = json!({
                "beans_per_unit": [{"key": "blockComputeLimit", "beans": bad}]
            });
            assert!(matches!(
                BlockParams::parse(&params),
                Err(ParamsError::BadAmount { .. })
            ));
        }
    }

    #[test]
    fn non_object_params_are_malformed() {
        assert!(matches!(
            BlockParams::parse(&json!(null)),
            Err(ParamsError::Malformed(_))
        ));
    }
}
