//! Attestation material providers.
//!
//! The engine never stores keys itself. It asks a [`SecurityProvider`] for
//! the registration id and TLS identity, and a [`KeyAttestation`] provider
//! additionally for the TPM public keys, nonce import and token signing.

pub mod software;
pub mod x509;

use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::Result;

pub use software::SoftwareKeyProvider;
pub use x509::X509Provider;

/// TLS identity handed to the transport. Opaque to the engine.
#[derive(Clone)]
pub struct TlsCredential {
    inner: Arc<TlsIdentity>,
}

struct TlsIdentity {
    certificate_chain: Vec<Vec<u8>>,
    private_key: Option<Zeroizing<Vec<u8>>>,
}

impl TlsCredential {
    /// Client certificate chain (leaf first, DER) and its private key.
    pub fn with_client_identity(certificate_chain: Vec<Vec<u8>>, private_key: Zeroizing<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(TlsIdentity {
                certificate_chain,
                private_key: Some(private_key),
            }),
        }
    }

    /// Server authentication only; the device proves itself with a bearer token.
    pub fn server_auth_only() -> Self {
        Self {
            inner: Arc::new(TlsIdentity {
                certificate_chain: Vec::new(),
                private_key: None,
            }),
        }
    }

    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.inner.certificate_chain
    }

    pub fn private_key(&self) -> Option<&[u8]> {
        self.inner.private_key.as_deref().map(Vec::as_slice)
    }

    pub fn has_client_identity(&self) -> bool {
        self.inner.private_key.is_some() && !self.inner.certificate_chain.is_empty()
    }
}

impl fmt::Debug for TlsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredential")
            .field("certificates", &self.inner.certificate_chain.len())
            .field("client_identity", &self.has_client_identity())
            .finish()
    }
}

/// Capabilities every attestation mechanism offers.
pub trait SecurityProvider: Send + Sync {
    fn registration_id(&self) -> Result<String>;

    fn tls_credential(&self) -> Result<Option<TlsCredential>>;
}

/// TPM-style key attestation: EK/SRK, nonce import and signing.
pub trait KeyAttestation: SecurityProvider {
    fn endorsement_key(&self) -> Result<Vec<u8>>;

    fn storage_root_key(&self) -> Result<Vec<u8>>;

    /// Sign with the key previously installed by [`import_key`](Self::import_key).
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Install the decoded authentication key the service returned.
    fn import_key(&self, key: &[u8]) -> Result<()>;
}

/// The device's attestation mechanism. Exactly one per device.
#[derive(Clone)]
pub enum Attestation {
    SymmetricKey(Arc<dyn KeyAttestation>),
    X509(Arc<dyn SecurityProvider>),
}

impl Attestation {
    pub fn registration_id(&self) -> Result<String> {
        match self {
            Attestation::SymmetricKey(provider) => provider.registration_id(),
            Attestation::X509(provider) => provider.registration_id(),
        }
    }

    pub fn tls_credential(&self) -> Result<Option<TlsCredential>> {
        match self {
            Attestation::SymmetricKey(provider) => provider.tls_credential(),
            Attestation::X509(provider) => provider.tls_credential(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Attestation::SymmetricKey(_) => "symmetric-key",
            Attestation::X509(_) => "x509",
        }
    }
}

impl fmt::Debug for Attestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
