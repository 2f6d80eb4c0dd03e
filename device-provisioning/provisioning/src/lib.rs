//! Device registration engine for a device provisioning service.
//!
//! A [`ProvisioningClient`] proves the device's identity with one of the
//! [`Attestation`] mechanisms, then polls the service until the device is
//! assigned, rejected or disabled. The wire protocol is supplied by the caller
//! as a [`ProvisioningContract`].

pub mod authorization;
pub mod config;
pub mod contract;
pub mod correlator;
pub mod crypto;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod register;
pub mod security;
pub mod status;
pub mod token;

#[cfg(feature = "tpm-provider")]
pub mod tpm;

pub use authorization::Authorization;
pub use config::ProvisioningConfig;
pub use contract::{NonceRequest, Protocol, ProvisioningContract, RegisterRequest, StatusRequest};
pub use correlator::{Correlator, ResponseCallback};
pub use error::{Error, ErrorKind, Result};
pub use model::{RegistrationOutcome, RegistrationStatus};
pub use orchestrator::{ProvisioningClient, ProvisioningState};
pub use register::RegisterTask;
pub use security::{Attestation, KeyAttestation, SecurityProvider, TlsCredential};
pub use status::StatusTask;

use std::sync::Arc;

/// Detect a hardware key attestation provider on this machine.
///
/// Detection order: TPM → error.
pub fn detect_key_provider() -> Result<Arc<dyn KeyAttestation>> {
    #[cfg(feature = "tpm-provider")]
    if tpm::detect_platform() {
        log::info!("detected TPM key attestation provider");
        return Ok(Arc::new(tpm::TpmKeyProvider::default()));
    }

    Err(Error::Security("no key attestation provider detected".into()))
}
