//! Bundle validation: structural checks plus the SHA-512 content hash.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha512};

use crate::error::KernelError;
use crate::types::{Bundle, BundleId};

pub const ENDO_ZIP_BASE64: &str = "endoZipBase64";

/// Check that `bundle` is well formed and that its declared hash matches its
/// decoded contents. Returns the id the bundle installs under.
pub fn validate_bundle(bundle: &Bundle) -> Result<BundleId, KernelError> {
    if bundle.module_format != ENDO_ZIP_BASE64 {
        return Err(KernelError::InvalidBundle(format!(
            "unsupported module format '{}'",
            bundle.module_format
        )));
    }
    let claimed = bundle.endo_zip_base64_sha512.to_ascii_lowercase();
    if claimed.len() != 128 || hex::decode(&claimed).is_err() {
        return Err(KernelError::InvalidBundle(
            "endoZipBase64Sha512 is not a hex SHA-512 digest".into(),
        ));
    }
    let bytes = STANDARD
        .decode(bundle.endo_zip_base64.as_bytes())
        .map_err(|err| KernelError::InvalidBundle(format!("bad base64 payload: {err}")))?;
    let actual = hex::encode(Sha512::digest(&bytes));
    if actual != claimed {
        return Err(KernelError::InvalidBundle(format!(
            "hash mismatch: declared {claimed}, computed {actual}"
        )));
    }
    Ok(BundleId::from_sha512(&actual))
}

/// Build a well-formed bundle around raw archive bytes.
pub fn make_bundle(archive: &[u8]) -> Bundle {
    Bundle {
        module_format: ENDO_ZIP_BASE64.to_string(),
        endo_zip_base64: STANDARD.encode(archive),
        endo_zip_base64_sha512: hex::encode(Sha512::digest(archive)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_bundle_validates() {
        let bundle = make_bundle(b"zip bytes");
        let id = validate_bundle(&bundle).unwrap();
        assert_eq!(id.as_str(), format!("b1-{}", bundle.endo_zip_base64_sha512));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut bundle = make_bundle(b"zip bytes");
        bundle.endo_zip_base64 = STANDARD.encode(b"other bytes");
        let err = validate_bundle(&bundle).unwrap_err();
        assert!(err.to_string().contains("hash mismatch"));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut bundle = make_bundle(b"zip bytes");
        bundle.module_format = "getExport".into();
        assert!(matches!(
            validate_bundle(&bundle),
            Err(KernelError::InvalidBundle(_))
        ));
    }
}
