use std::fmt;

use crate::security::TlsCredential;

/// Session state for one registration attempt.
///
/// The register task fills it in; status polling only reads it. Dropped
/// when the attempt ends.
#[derive(Default)]
pub struct Authorization {
    tls_credential: Option<TlsCredential>,
    bearer_token: Option<String>,
}

impl Authorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tls_credential(&self) -> Option<&TlsCredential> {
        self.tls_credential.as_ref()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub(crate) fn set_tls_credential(&mut self, credential: TlsCredential) {
        self.tls_credential = Some(credential);
    }

    pub(crate) fn set_bearer_token(&mut self, token: String) {
        self.bearer_token = Some(token);
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("tls_credential", &self.tls_credential)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
