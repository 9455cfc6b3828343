use std::fmt;

use serde::{Deserialize, Serialize};

/// Kernel-side promise identifier (`kp<N>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelPromiseId(String);

impl KernelPromiseId {
    pub fn new(index: u64) -> Self {
        Self(format!("kp{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelPromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to an object exported by a vat. Object 0 is the vat root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub vat: String,
    pub id: u64,
}

impl ObjectRef {
    pub fn root(vat: impl Into<String>) -> Self {
        Self {
            vat: vat.into(),
            id: 0,
        }
    }

    pub fn new(vat: impl Into<String>, id: u64) -> Self {
        Self {
            vat: vat.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:o+{}", self.vat, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseStatus {
    Unresolved,
    Fulfilled,
    Rejected,
}

/// Named bridge channels between the chain and handler vats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeId {
    Bank,
    Core,
    Dibc,
    Provision,
    Storage,
    Wallet,
}

impl BridgeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeId::Bank => "bank",
            BridgeId::Core => "core",
            BridgeId::Dibc => "dibc",
            BridgeId::Provision => "provision",
            BridgeId::Storage => "storage",
            BridgeId::Wallet => "wallet",
        }
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numbered mailbox message, encoded on the wire as `[num, body]`.
pub type MailboxMessage = (u64, String);

/// Code bundle submitted for installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub module_format: String,
    pub endo_zip_base64: String,
    pub endo_zip_base64_sha512: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn from_sha512(hex_digest: &str) -> Self {
        Self(format!("b1-{hex_digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-crank report handed to the run policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrankDetails {
    pub computrons: Option<u64>,
}

/// Snapshot of kernel-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelStats {
    pub crank_count: u64,
    pub vat_count: u64,
    pub run_queue_length: u64,
    pub promise_count: u64,
    pub unresolved_promise_count: u64,
    pub installed_bundle_count: u64,
    pub pending_wakeup_count: u64,
}

/// One key change in the kernel's exported state. `None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportUpdate {
    pub key: String,
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_like_the_kernel_does() {
        assert_eq!(KernelPromiseId::new(40).to_string(), "kp40");
        assert_eq!(ObjectRef::root("bootstrap").to_string(), "bootstrap:o+0");
        assert_eq!(BundleId::from_sha512("abcd").as_str(), "b1-abcd");
    }

    #[test]
    fn bundle_uses_camel_case_fields() {
        let json = serde_json::json!({
            "moduleFormat": "endoZipBase64",
            "endoZipBase64": "aGk=",
            "endoZipBase64Sha512": "00",
        });
        let bundle: Bundle = serde_json::from_value(json).unwrap();
        assert_eq!(bundle.module_format, "endoZipBase64");
        assert_eq!(bundle.endo_zip_base64_sha512, "00");
    }
}
