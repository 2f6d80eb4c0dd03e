use std::time::Duration;

use crate::authorization::Authorization;
use crate::config::DEFAULT_OPERATION_TIMEOUT;
use crate::contract::{ProvisioningContract, StatusRequest};
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::model::RegistrationOutcome;
use crate::security::Attestation;

/// One status query for a long-running registration operation.
pub struct StatusTask<'a> {
    operation_id: &'a str,
    attestation: &'a Attestation,
    contract: &'a dyn ProvisioningContract,
    authorization: &'a Authorization,
    correlator: Correlator,
}

impl<'a> StatusTask<'a> {
    pub fn new(
        operation_id: &'a str,
        attestation: &'a Attestation,
        contract: &'a dyn ProvisioningContract,
        authorization: &'a Authorization,
    ) -> Result<Self> {
        if operation_id.is_empty() {
            return Err(Error::client("operation id is empty"));
        }
        Ok(Self {
            operation_id,
            attestation,
            contract,
            authorization,
            correlator: Correlator::new(DEFAULT_OPERATION_TIMEOUT),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.correlator = Correlator::new(timeout);
        self
    }

    pub fn call(&self) -> Result<RegistrationOutcome> {
        // Read fresh on every poll; the provider owns the identity.
        let registration_id = self.attestation.registration_id()?;
        if registration_id.is_empty() {
            return Err(Error::security("registration id is empty"));
        }
        let tls_credential = self
            .authorization
            .tls_credential()
            .ok_or_else(|| Error::security("no TLS credential in authorization"))?;

        log::debug!("querying status of operation {}", self.operation_id);
        let response = self.correlator.call("getStatus", |callback| {
            self.contract.get_status(
                StatusRequest {
                    operation_id: self.operation_id,
                    registration_id: &registration_id,
                    bearer_token: self.authorization.bearer_token(),
                    tls_credential,
                },
                callback,
            )
        })?;

        RegistrationOutcome::from_json(&response)
    }
}
