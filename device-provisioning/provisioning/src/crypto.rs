use hkdf::hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// HMAC-SHA256 of `data` under `key`, the signature a bearer token carries.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if key.is_empty() {
        return Err(Error::security("HMAC key is empty"));
    }
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::security(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Registration id for a device enrolled by its endorsement key.
///
/// Lowercase hex of SHA-256 over the EK bytes: stable across reboots and
/// within the service's registration id alphabet.
pub fn registration_id_from_ek(endorsement_key: &[u8]) -> String {
    Sha256::digest(endorsement_key)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
