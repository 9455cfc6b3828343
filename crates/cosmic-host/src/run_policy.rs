//! Per-block compute budgets.
//!
//! A [`MeteredRunPolicy`] is built from the block's `beansPerUnit` params at
//! END_BLOCK and shared by every run cycle of that block. Costs accumulate
//! into one counter and the kernel is allowed to keep running while that
//! counter is below `blockComputeLimit`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cosmic_kernel::{CrankDetails, RunPolicy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::params::BeansPerUnit;

/// Computrons charged for a crank that failed.
pub const CRANK_FAILURE_COMPUTRONS: u64 = 1_000_000;

/// Unit of compute accounting. Integer-only with saturating arithmetic;
/// encoded as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Beans(pub u128);

impl Beans {
    pub const ZERO: Beans = Beans(0);

    pub fn saturating_add(self, other: Beans) -> Beans {
        Beans(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Beans) -> Beans {
        Beans(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u64) -> Beans {
        Beans(self.0.saturating_mul(u128::from(factor)))
    }
}

impl fmt::Display for Beans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Beans {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Beans)
    }
}

impl From<u64> for Beans {
    fn from(value: u64) -> Self {
        Beans(u128::from(value))
    }
}

impl Serialize for Beans {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Beans {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Converts computrons reported by the kernel into beans.
pub trait ComputronPricing: Send + Sync {
    fn price(&self, beans_per_unit: &BeansPerUnit, computrons: u64) -> Beans;
}

/// Flat price: every computron costs `xsnapComputron` beans.
#[derive(Debug, Clone, Copy, Default)]
pub struct XsnapComputronPrice;

impl ComputronPricing for XsnapComputronPrice {
    fn price(&self, beans_per_unit: &BeansPerUnit, computrons: u64) -> Beans {
        beans_per_unit.xsnap_computron.saturating_mul(computrons)
    }
}

/// Run policy with the budget queries the block manager needs between runs.
pub trait ChainRunPolicy: RunPolicy {
    fn should_run(&self) -> bool;

    /// Beans left in the block; `None` when the policy is unbounded.
    fn remaining_beans(&self) -> Option<Beans>;

    fn total_beans(&self) -> Beans;
}

pub struct MeteredRunPolicy {
    beans_per_unit: BeansPerUnit,
    pricing: Arc<dyn ComputronPricing>,
    total: Beans,
}

impl fmt::Debug for MeteredRunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteredRunPolicy")
            .field("beans_per_unit", &self.beans_per_unit)
            .field("total", &self.total)
            .finish()
    }
}

impl MeteredRunPolicy {
    pub fn new(beans_per_unit: BeansPerUnit) -> Self {
        Self::with_pricing(beans_per_unit, Arc::new(XsnapComputronPrice))
    }

    pub fn with_pricing(beans_per_unit: BeansPerUnit, pricing: Arc<dyn ComputronPricing>) -> Self {
        Self {
            beans_per_unit,
            pricing,
            total: Beans::ZERO,
        }
    }

    fn add(&mut self, beans: Beans) -> bool {
        self.total = self.total.saturating_add(beans);
        self.should_run()
    }
}

impl RunPolicy for MeteredRunPolicy {
    fn vat_created(&mut self) -> bool {
        self.add(self.beans_per_unit.vat_creation)
    }

    fn crank_complete(&mut self, details: &CrankDetails) -> bool {
        match details.computrons {
            Some(computrons) => {
                let cost = self.pricing.price(&self.beans_per_unit, computrons);
                self.add(cost)
            }
            None => self.should_run(),
        }
    }

    fn crank_failed(&mut self) -> bool {
        let cost = self
            .pricing
            .price(&self.beans_per_unit, CRANK_FAILURE_COMPUTRONS);
        self.add(cost)
    }

    fn empty_crank(&mut self) -> bool {
        true
    }
}

impl ChainRunPolicy for MeteredRunPolicy {
    fn should_run(&self) -> bool {
        self.total < self.beans_per_unit.block_compute_limit
    }

    fn remaining_beans(&self) -> Option<Beans> {
        Some(
            self.beans_per_unit
                .block_compute_limit
                .saturating_sub(self.total),
        )
    }

    fn total_beans(&self) -> Beans {
        self.total
    }
}

/// Unbounded policy used for the bootstrap block.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

pub fn never_stop() -> NeverStop {
    NeverStop
}

impl RunPolicy for NeverStop {
    fn vat_created(&mut self) -> bool {
        true
    }

    fn crank_complete(&mut self, _details: &CrankDetails) -> bool {
        true
    }

    fn crank_failed(&mut self) -> bool {
        true
    }

    fn empty_crank(&mut self) -> bool {
        true
    }
}

impl ChainRunPolicy for NeverStop {
    fn should_run(&self) -> bool {
        true
    }

    fn remaining_beans(&self) -> Option<Beans> {
        None
    }

    fn total_beans(&self) -> Beans {
        Beans::ZERO
    }
}
