use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use provisioning::tpm::{self, EK_HANDLE, SRK_HANDLE, TpmKeyProvider};
use provisioning::{KeyAttestation, SecurityProvider};
use tss_esapi::Context as TpmContext;
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm, SymmetricMode};
use tss_esapi::interface_types::dynamic_handles::Persistent;
use tss_esapi::interface_types::key_bits::{AesKeyBits, RsaKeyBits};
use tss_esapi::interface_types::resource_handles::{Hierarchy, Provision};
use tss_esapi::structures::{
    Public, PublicBuilder, PublicKeyRsa, PublicRsaParametersBuilder, RsaExponent, RsaScheme,
    SymmetricDefinitionObject,
};

const TPM_DEVICE_ENV: &str = "TPM_DEVICE";

/// Restricted RSA-2048 decryption key with AES-128-CFB protection, the shape
/// both the EK and the SRK take.
///
/// Uses user_with_auth (not admin_with_policy) so that null auth sessions
/// work for ActivateCredential later.
fn storage_rsa_template() -> Result<Public> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_restricted(true)
        .with_decrypt(true)
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_no_da(true)
        .build()?;

    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(RsaScheme::Null)
        .with_key_bits(RsaKeyBits::Rsa2048)
        .with_exponent(RsaExponent::default())
        .with_symmetric(SymmetricDefinitionObject::Aes {
            key_bits: AesKeyBits::Aes128,
            mode: SymmetricMode::Cfb,
        })
        .with_restricted(true)
        .with_is_signing_key(false)
        .with_is_decryption_key(true)
        .build()?;

    // Zero-filled unique field for a deterministic primary
    let unique = PublicKeyRsa::new_empty_with_size(RsaKeyBits::Rsa2048);

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(unique)
        .build()
        .context("failed to build RSA storage template")
}

/// Create a primary key under `hierarchy` and persist it at `handle`.
///
/// Idempotent: if the handle is already occupied, nothing happens.
fn ensure_persistent_primary(ctx: &mut TpmContext, hierarchy: Hierarchy, handle: u32, name: &str) -> Result<()> {
    if tpm::persistent_object(ctx, handle).is_ok() {
        log::info!("{name} already exists at handle {:#X}, nothing to do", handle);
        return Ok(());
    }

    log::info!("provisioning {name} at handle {:#X}", handle);
    let template = storage_rsa_template()?;

    ctx.execute_with_nullauth_session(|ctx| -> std::result::Result<(), tss_esapi::Error> {
        let primary = ctx.create_primary(hierarchy, template, None, None, None, None)?;

        let persistent = tss_esapi::handles::PersistentTpmHandle::new(handle)?;
        ctx.evict_control(
            Provision::Owner,
            primary.key_handle.into(),
            Persistent::Persistent(persistent),
        )?;

        ctx.flush_context(primary.key_handle.into())?;
        Ok(())
    })
    .with_context(|| format!("TPM {name} provisioning failed"))?;

    log::info!("persisted {name} at handle {:#X}", handle);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let device = std::env::var(TPM_DEVICE_ENV).unwrap_or_else(|_| tpm::DEFAULT_TPM_DEVICE.to_string());
    let mut ctx = tpm::open_context(&device)?;
    ensure_persistent_primary(&mut ctx, Hierarchy::Endorsement, EK_HANDLE, "EK")?;
    ensure_persistent_primary(&mut ctx, Hierarchy::Owner, SRK_HANDLE, "SRK")?;
    drop(ctx);

    let provider = TpmKeyProvider::new(device);
    let endorsement_key = provider.endorsement_key().context("failed to read EK")?;
    let registration_id = provider.registration_id().context("failed to derive registration id")?;

    println!("Registration Id: {registration_id}");
    println!("Endorsement Key: {}", B64.encode(&endorsement_key));
    Ok(())
}
