use std::sync::Mutex;
use zeroize::Zeroizing;

use super::{KeyAttestation, SecurityProvider, TlsCredential};
use crate::crypto;
use crate::error::{Error, Result};

/// In-memory stand-in for a TPM, for development devices and tests.
///
/// The imported authentication key is used directly as an HMAC-SHA256 key,
/// the same scheme symmetric-key enrollments use.
pub struct SoftwareKeyProvider {
    registration_id: String,
    endorsement_key: Vec<u8>,
    storage_root_key: Vec<u8>,
    auth_key: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl SoftwareKeyProvider {
    pub fn new(
        registration_id: impl Into<String>,
        endorsement_key: impl Into<Vec<u8>>,
        storage_root_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            registration_id: registration_id.into(),
            endorsement_key: endorsement_key.into(),
            storage_root_key: storage_root_key.into(),
            auth_key: Mutex::new(None),
        }
    }

    /// Emulated device whose registration id is derived from its EK.
    pub fn from_keys(endorsement_key: impl Into<Vec<u8>>, storage_root_key: impl Into<Vec<u8>>) -> Self {
        let endorsement_key = endorsement_key.into();
        let registration_id = crypto::registration_id_from_ek(&endorsement_key);
        Self::new(registration_id, endorsement_key, storage_root_key)
    }

    fn lock_key(&self) -> Result<std::sync::MutexGuard<'_, Option<Zeroizing<Vec<u8>>>>> {
        self.auth_key
            .lock()
            .map_err(|_| Error::security("authentication key store poisoned"))
    }
}

impl SecurityProvider for SoftwareKeyProvider {
    fn registration_id(&self) -> Result<String> {
        Ok(self.registration_id.clone())
    }

    fn tls_credential(&self) -> Result<Option<TlsCredential>> {
        Ok(Some(TlsCredential::server_auth_only()))
    }
}

impl KeyAttestation for SoftwareKeyProvider {
    fn endorsement_key(&self) -> Result<Vec<u8>> {
        Ok(self.endorsement_key.clone())
    }

    fn storage_root_key(&self) -> Result<Vec<u8>> {
        Ok(self.storage_root_key.clone())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let guard = self.lock_key()?;
        let key = guard
            .as_ref()
            .ok_or_else(|| Error::security("no authentication key imported"))?;
        crypto::hmac_sha256(key, data)
    }

    fn import_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::security("authentication key is empty"));
        }
        *self.lock_key()? = Some(Zeroizing::new(key.to_vec()));
        log::debug!("imported {} byte authentication key", key.len());
        Ok(())
    }
}
