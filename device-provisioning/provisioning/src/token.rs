use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::security::KeyAttestation;

const TOKEN_PREFIX: &str = "SharedAccessSignature";
const KEY_NAME: &str = "registration";

/// Resource the registration token is scoped to.
pub fn token_scope(id_scope: &str, registration_id: &str) -> Result<String> {
    for (name, component) in [("id scope", id_scope), ("registration id", registration_id)] {
        if component.is_empty() {
            return Err(Error::client(format!("{name} is empty")));
        }
        if component
            .chars()
            .any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace() || c.is_control())
        {
            return Err(Error::client(format!("{name} {component:?} is not a valid path segment")));
        }
    }
    Ok(format!("{id_scope}/registrations/{registration_id}"))
}

/// Build the bearer token for `scope`, expiring at `expiry` (epoch seconds),
/// signed by the provider's imported key.
pub fn sign_token(scope: &str, expiry: u64, signer: &dyn KeyAttestation) -> Result<String> {
    let signing_input = format!("{scope}\n{expiry}");
    let signature = signer.sign(signing_input.as_bytes())?;
    if signature.is_empty() {
        return Err(Error::client("signer returned an empty signature"));
    }

    Ok(format!(
        "{TOKEN_PREFIX} sr={}&sig={}&se={expiry}&skn={KEY_NAME}",
        urlencoding::encode(scope),
        urlencoding::encode(&B64.encode(signature)),
    ))
}

/// Expiry `ttl` from now, in seconds since the epoch.
pub fn expiry_after(ttl: Duration) -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::client(format!("system clock before epoch: {e}")))?;
    now.checked_add(ttl)
        .map(|expiry| expiry.as_secs())
        .ok_or_else(|| Error::client(format!("token lifetime of {ttl:?} is out of range")))
}
