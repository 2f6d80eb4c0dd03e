//! Drives one registration attempt from the first register call to a
//! terminal outcome.
//!
//! ```text
//! NotStarted -> Registering -> Assigned | Failed | Disabled
//!                    \-> Assigning -(poll)-> Assigned | Failed | Disabled
//! ```
//!
//! Any error ends the attempt in `Error`.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::authorization::Authorization;
use crate::config::ProvisioningConfig;
use crate::contract::ProvisioningContract;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{RegistrationOutcome, RegistrationStatus};
use crate::register::RegisterTask;
use crate::security::Attestation;
use crate::status::StatusTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    NotStarted,
    Registering,
    Assigning,
    Assigned,
    Failed,
    Disabled,
    Error,
}

impl From<RegistrationStatus> for ProvisioningState {
    fn from(status: RegistrationStatus) -> Self {
        match status {
            RegistrationStatus::Unassigned | RegistrationStatus::Assigning => ProvisioningState::Assigning,
            RegistrationStatus::Assigned => ProvisioningState::Assigned,
            RegistrationStatus::Failed => ProvisioningState::Failed,
            RegistrationStatus::Disabled => ProvisioningState::Disabled,
        }
    }
}

type StateObserver = Box<dyn FnMut(ProvisioningState) + Send>;

/// Registers a device and waits for the service to place it.
pub struct ProvisioningClient {
    config: ProvisioningConfig,
    attestation: Attestation,
    contract: Arc<dyn ProvisioningContract>,
    state: ProvisioningState,
    observer: Option<StateObserver>,
}

impl ProvisioningClient {
    pub fn new(
        config: ProvisioningConfig,
        attestation: Attestation,
        contract: Arc<dyn ProvisioningContract>,
    ) -> Result<Self> {
        config.validate()?;
        if contract.protocol() != config.protocol {
            return Err(Error::client(format!(
                "contract speaks {} but configuration selects {}",
                contract.protocol(),
                config.protocol
            )));
        }
        log::info!(
            "provisioning client for scope {} using {} attestation over {}",
            config.id_scope,
            attestation.name(),
            config.protocol
        );

        Ok(Self {
            config,
            attestation,
            contract,
            state: ProvisioningState::NotStarted,
            observer: None,
        })
    }

    /// Build the contract from the validated configuration, so the transport
    /// learns the service endpoint and id scope it is to talk to.
    pub fn connect<F>(config: ProvisioningConfig, attestation: Attestation, create_contract: F) -> Result<Self>
    where
        F: FnOnce(&ProvisioningConfig) -> Result<Arc<dyn ProvisioningContract>>,
    {
        config.validate()?;
        log::debug!("creating {} contract for {}", config.protocol, config.global_endpoint);
        let contract = create_contract(&config)?;
        Self::new(config, attestation, contract)
    }

    /// Called with each new state as the attempt progresses.
    pub fn with_state_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(ProvisioningState) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Run a registration attempt to its terminal outcome.
    ///
    /// A service rejection seen while polling is reported as a FAILED
    /// outcome carrying the rejection's code and message. The final sleep is
    /// shortened to what is left of the attempt budget and followed by one
    /// more poll, so an unfinished registration is polled at least once
    /// whenever the register call left any budget.
    pub fn register(&mut self) -> Result<RegistrationOutcome> {
        let result = self.run_attempt();
        match &result {
            Ok(outcome) => {
                log::info!("registration finished: {}", outcome.status);
                self.transition(outcome.status.into());
            }
            Err(err) => {
                log::error!("registration failed: {err}");
                self.transition(ProvisioningState::Error);
            }
        }
        result
    }

    fn run_attempt(&mut self) -> Result<RegistrationOutcome> {
        let started = Instant::now();
        let mut authorization = Authorization::new();

        self.transition(ProvisioningState::Registering);
        let outcome = RegisterTask::new(
            &self.config,
            &self.attestation,
            self.contract.as_ref(),
            &mut authorization,
        )?
        .call()?;

        if outcome.status.is_terminal() {
            return Ok(outcome);
        }

        let operation_id = match outcome.operation_id {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(Error::client(format!(
                    "service reported {} without an operation id",
                    outcome.status
                )));
            }
        };
        self.transition(ProvisioningState::Assigning);
        log::info!("registration in progress, polling operation {operation_id}");

        let budget = self.config.attempt_budget;
        let interval = self.config.poll_interval;
        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(Error::AttemptExpired(budget));
            }
            thread::sleep(interval.min(remaining));

            // The last poll may get a zero wait; an answer already delivered still counts.
            let timeout = self
                .config
                .operation_timeout
                .min(budget.saturating_sub(started.elapsed()));
            let polled = StatusTask::new(
                &operation_id,
                &self.attestation,
                self.contract.as_ref(),
                &authorization,
            )?
            .with_timeout(timeout)
            .call();

            match polled {
                Ok(outcome) if outcome.status.is_terminal() => return Ok(outcome),
                Ok(outcome) => log::debug!("operation {operation_id} still {}", outcome.status),
                Err(Error::Hub { code, message }) => {
                    log::warn!("service rejected registration while polling: {message}");
                    return Ok(RegistrationOutcome::rejected(code, message));
                }
                Err(err) if is_retryable(&err) => {
                    log::warn!("status poll failed, retrying: {err}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn transition(&mut self, next: ProvisioningState) {
        if self.state == next {
            return;
        }
        log::debug!("provisioning state {:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(next);
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    err.kind() == ErrorKind::Transport || matches!(err, Error::Timeout { .. } | Error::NoResponse { .. })
}
