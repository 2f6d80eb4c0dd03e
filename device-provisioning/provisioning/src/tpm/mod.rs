use anyhow::{Context, bail};
use std::str::FromStr;
use tss_esapi::Context as TpmContext;
use tss_esapi::handles::{ObjectHandle, PersistentTpmHandle, TpmHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, SymmetricMode};
use tss_esapi::interface_types::dynamic_handles::Persistent;
use tss_esapi::interface_types::key_bits::AesKeyBits;
use tss_esapi::interface_types::resource_handles::Provision;
use tss_esapi::interface_types::session_handles::AuthSession;
use tss_esapi::structures::{
    Data, EncryptedSecret, IdObject, MaxBuffer, Private, Public, SymmetricDefinitionObject,
};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::traits::{Marshall, UnMarshall};

use crate::crypto;
use crate::error::{Error, Result};
use crate::security::{KeyAttestation, SecurityProvider, TlsCredential};

pub const EK_HANDLE: u32 = 0x81010001;
pub const SRK_HANDLE: u32 = 0x81000001;
/// Where the service-issued HMAC key lives after import.
pub const AUTH_KEY_HANDLE: u32 = 0x81000100;
pub const DEFAULT_TPM_DEVICE: &str = "/dev/tpm0";

/// Check if a TPM device is available.
pub fn detect_platform() -> bool {
    std::path::Path::new(DEFAULT_TPM_DEVICE).exists()
}

/// Open an ESAPI context on a TPM character device.
pub fn open_context(tpm_device: &str) -> anyhow::Result<TpmContext> {
    let tcti = TctiNameConf::from_str(&format!("device:{tpm_device}"))
        .context("failed to create TCTI config")?;
    TpmContext::new(tcti).context("failed to create TPM context")
}

/// Resolve a persistent handle to an ESAPI object, failing if it is empty.
pub fn persistent_object(ctx: &mut TpmContext, handle: u32) -> anyhow::Result<ObjectHandle> {
    let tpm_handle: TpmHandle = handle.try_into().context("invalid persistent handle")?;
    ctx.execute_with_nullauth_session(|ctx| ctx.tr_from_tpm_public(tpm_handle))
        .with_context(|| format!("no object at handle {handle:#X}"))
}

/// Key attestation backed by the platform TPM.
///
/// EK and SRK must already be persisted (see `tpm-provisioning-init`). The
/// service's authentication key is activated with the EK, imported under the
/// SRK and persisted at [`AUTH_KEY_HANDLE`], replacing any earlier one.
pub struct TpmKeyProvider {
    device: String,
    registration_id: Option<String>,
}

impl Default for TpmKeyProvider {
    fn default() -> Self {
        Self {
            device: DEFAULT_TPM_DEVICE.to_string(),
            registration_id: None,
        }
    }
}

impl TpmKeyProvider {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            registration_id: None,
        }
    }

    /// Use an enrollment's registration id instead of the EK-derived one.
    pub fn with_registration_id(mut self, registration_id: impl Into<String>) -> Self {
        self.registration_id = Some(registration_id.into());
        self
    }

    fn public_area(&self, handle: u32) -> anyhow::Result<Vec<u8>> {
        let mut ctx = open_context(&self.device)?;
        let object = persistent_object(&mut ctx, handle)?;
        let (public, _, _) = ctx
            .read_public(object.into())
            .with_context(|| format!("failed to read public area at {handle:#X}"))?;
        let area = public.marshall().context("failed to marshal public area")?;

        // The service expects TPM2B_PUBLIC: big-endian size, then the area.
        let size = u16::try_from(area.len()).context("public area too large")?;
        let mut out = Vec::with_capacity(area.len() + 2);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&area);

        log::info!("read public area at handle {:#X} ({} bytes)", handle, out.len());
        Ok(out)
    }

    fn import_auth_key(&self, blob: &[u8]) -> anyhow::Result<()> {
        let mut cursor = blob;
        let credential_blob = IdObject::try_from(next_tpm2b(&mut cursor, "credential blob")?.to_vec())?;
        let secret = EncryptedSecret::try_from(next_tpm2b(&mut cursor, "encrypted secret")?.to_vec())?;
        let duplicate = Private::try_from(next_tpm2b(&mut cursor, "duplicate")?.to_vec())?;
        let seed = EncryptedSecret::try_from(next_tpm2b(&mut cursor, "encrypted seed")?.to_vec())?;
        let public = Public::unmarshall(next_tpm2b(&mut cursor, "public area")?)
            .context("failed to unmarshal authentication key public area")?;

        let mut ctx = open_context(&self.device)?;
        let ek = persistent_object(&mut ctx, EK_HANDLE)?;
        let srk = persistent_object(&mut ctx, SRK_HANDLE)?;

        let inner_wrap_key = ctx
            .execute_with_sessions(
                (Some(AuthSession::Password), Some(AuthSession::Password), None),
                |ctx| ctx.activate_credential(srk.into(), ek.into(), credential_blob, secret),
            )
            .context("TPM2_ActivateCredential failed")?;
        let encryption_key = Data::try_from(inner_wrap_key.value().to_vec())?;

        let private = ctx
            .execute_with_sessions((Some(AuthSession::Password), None, None), |ctx| {
                ctx.import(
                    srk,
                    Some(encryption_key),
                    public.clone(),
                    duplicate,
                    seed,
                    SymmetricDefinitionObject::Aes {
                        key_bits: AesKeyBits::Aes128,
                        mode: SymmetricMode::Cfb,
                    },
                )
            })
            .context("TPM2_Import failed")?;

        let loaded = ctx
            .execute_with_sessions((Some(AuthSession::Password), None, None), |ctx| {
                ctx.load(srk.into(), private, public)
            })
            .context("TPM2_Load failed")?;

        let persistent = PersistentTpmHandle::new(AUTH_KEY_HANDLE)?;
        if let Ok(existing) = persistent_object(&mut ctx, AUTH_KEY_HANDLE) {
            ctx.execute_with_sessions((Some(AuthSession::Password), None, None), |ctx| {
                ctx.evict_control(Provision::Owner, existing, Persistent::Persistent(persistent))
            })
            .context("failed to evict previous authentication key")?;
            log::info!("evicted previous authentication key at {:#X}", AUTH_KEY_HANDLE);
        }

        ctx.execute_with_sessions((Some(AuthSession::Password), None, None), |ctx| {
            ctx.evict_control(Provision::Owner, loaded.into(), Persistent::Persistent(persistent))
        })
        .context("failed to persist authentication key")?;
        ctx.flush_context(loaded.into())?;

        log::info!("authentication key persisted at {:#X}", AUTH_KEY_HANDLE);
        Ok(())
    }

    fn hmac(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut ctx = open_context(&self.device)?;
        let key = persistent_object(&mut ctx, AUTH_KEY_HANDLE)
            .context("no authentication key imported")?;
        let buffer = MaxBuffer::try_from(data.to_vec()).context("signing input too large")?;

        let digest = ctx
            .execute_with_nullauth_session(|ctx| ctx.hmac(key, buffer, HashingAlgorithm::Sha256))
            .context("TPM2_HMAC failed")?;
        Ok(digest.value().to_vec())
    }
}

impl SecurityProvider for TpmKeyProvider {
    fn registration_id(&self) -> Result<String> {
        match &self.registration_id {
            Some(id) => Ok(id.clone()),
            None => Ok(crypto::registration_id_from_ek(&self.endorsement_key()?)),
        }
    }

    fn tls_credential(&self) -> Result<Option<TlsCredential>> {
        Ok(Some(TlsCredential::server_auth_only()))
    }
}

impl KeyAttestation for TpmKeyProvider {
    fn endorsement_key(&self) -> Result<Vec<u8>> {
        self.public_area(EK_HANDLE).map_err(Error::Hsm)
    }

    fn storage_root_key(&self) -> Result<Vec<u8>> {
        self.public_area(SRK_HANDLE).map_err(Error::Hsm)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.hmac(data).map_err(Error::Hsm)
    }

    fn import_key(&self, key: &[u8]) -> Result<()> {
        self.import_auth_key(key).map_err(Error::Hsm)
    }
}

/// Split one size-prefixed TPM2B structure off the front of `cursor`.
fn next_tpm2b<'a>(cursor: &mut &'a [u8], what: &str) -> anyhow::Result<&'a [u8]> {
    let Some((size, rest)) = cursor.split_first_chunk::<2>() else {
        bail!("authentication key truncated before {what} size");
    };
    let size = u16::from_be_bytes(*size) as usize;
    if rest.len() < size {
        bail!("authentication key truncated inside {what}: need {size} bytes, have {}", rest.len());
    }
    let (value, rest) = rest.split_at(size);
    *cursor = rest;
    Ok(value)
}
