use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use zeroize::Zeroizing;

use crate::authorization::Authorization;
use crate::config::ProvisioningConfig;
use crate::contract::{NonceRequest, ProvisioningContract, RegisterRequest};
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::model::{self, DeviceRegistration, RegistrationOutcome};
use crate::security::{Attestation, KeyAttestation, SecurityProvider};
use crate::token;

/// Runs the registration handshake for the device's attestation mechanism.
pub struct RegisterTask<'a> {
    config: &'a ProvisioningConfig,
    attestation: &'a Attestation,
    contract: &'a dyn ProvisioningContract,
    authorization: &'a mut Authorization,
    correlator: Correlator,
}

impl<'a> RegisterTask<'a> {
    pub fn new(
        config: &'a ProvisioningConfig,
        attestation: &'a Attestation,
        contract: &'a dyn ProvisioningContract,
        authorization: &'a mut Authorization,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            attestation,
            contract,
            authorization,
            correlator: Correlator::new(config.operation_timeout),
        })
    }

    pub fn call(mut self) -> Result<RegistrationOutcome> {
        let attestation = self.attestation;
        match attestation {
            Attestation::SymmetricKey(provider) => self.register_with_key(provider.as_ref()),
            Attestation::X509(provider) => self.register_with_x509(provider.as_ref()),
        }
    }

    fn register_with_key(&mut self, provider: &dyn KeyAttestation) -> Result<RegistrationOutcome> {
        let registration_id = provider.registration_id()?;
        if registration_id.is_empty() {
            return Err(Error::security("registration id is empty"));
        }
        let endorsement_key = provider.endorsement_key()?;
        if endorsement_key.is_empty() {
            return Err(Error::security("endorsement key is empty"));
        }
        let storage_root_key = provider.storage_root_key()?;
        if storage_root_key.is_empty() {
            return Err(Error::security("storage root key is empty"));
        }

        let body = DeviceRegistration::tpm(&registration_id, &endorsement_key, &storage_root_key).to_json()?;

        let tls_credential = provider
            .tls_credential()?
            .ok_or_else(|| Error::security("security provider has no TLS credential"))?;
        self.authorization.set_tls_credential(tls_credential.clone());

        log::info!("requesting TPM nonce for {registration_id}");
        let response = self.correlator.call("requestNonce", |callback| {
            self.contract.request_nonce(
                NonceRequest {
                    body: &body,
                    registration_id: &registration_id,
                    tls_credential: &tls_credential,
                },
                callback,
            )
        })?;

        let encoded = model::parse_authentication_key(&response)?;
        let auth_key = Zeroizing::new(
            B64.decode(encoded.as_bytes())
                .map_err(|e| Error::Authentication(format!("authentication key is not base64: {e}")))?,
        );
        provider.import_key(&auth_key)?;
        log::debug!("authentication key imported");

        let scope = token::token_scope(&self.config.id_scope, &registration_id)?;
        let expiry = token::expiry_after(self.config.token_ttl)?;
        let bearer_token = token::sign_token(&scope, expiry, provider)?;
        self.authorization.set_bearer_token(bearer_token.clone());

        log::info!("registering {registration_id} with signed token");
        let response = self.correlator.call("authenticate", |callback| {
            self.contract.authenticate(
                RegisterRequest {
                    body: &body,
                    registration_id: &registration_id,
                    tls_credential: &tls_credential,
                    bearer_token: Some(&bearer_token),
                },
                callback,
            )
        })?;

        RegistrationOutcome::from_json(&response)
    }

    fn register_with_x509(&mut self, provider: &dyn SecurityProvider) -> Result<RegistrationOutcome> {
        let registration_id = provider.registration_id()?;
        if registration_id.is_empty() {
            return Err(Error::client("registration id is empty"));
        }

        let body = DeviceRegistration::x509(&registration_id).to_json()?;

        let tls_credential = provider
            .tls_credential()?
            .ok_or_else(|| Error::security("X.509 provider has no TLS credential"))?;
        self.authorization.set_tls_credential(tls_credential.clone());

        log::info!("registering {registration_id} with X.509 client certificate");
        let response = self.correlator.call("authenticate", |callback| {
            self.contract.authenticate(
                RegisterRequest {
                    body: &body,
                    registration_id: &registration_id,
                    tls_credential: &tls_credential,
                    bearer_token: None,
                },
                callback,
            )
        })?;

        RegistrationOutcome::from_json(&response)
    }
}
