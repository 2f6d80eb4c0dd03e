//! Request and response bodies exchanged with the provisioning service.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationStatus {
    Unassigned,
    Assigning,
    Assigned,
    Failed,
    Disabled,
}

impl RegistrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RegistrationStatus::Assigned | RegistrationStatus::Failed | RegistrationStatus::Disabled
        )
    }
}

impl FromStr for RegistrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unassigned" => Ok(RegistrationStatus::Unassigned),
            "assigning" => Ok(RegistrationStatus::Assigning),
            "assigned" => Ok(RegistrationStatus::Assigned),
            "failed" => Ok(RegistrationStatus::Failed),
            "disabled" => Ok(RegistrationStatus::Disabled),
            _ => Err(Error::client(format!("unrecognized registration status {s:?}"))),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegistrationStatus::Unassigned => "unassigned",
            RegistrationStatus::Assigning => "assigning",
            RegistrationStatus::Assigned => "assigned",
            RegistrationStatus::Failed => "failed",
            RegistrationStatus::Disabled => "disabled",
        })
    }
}

/// Result of a register or status call, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub status: RegistrationStatus,
    /// Set while the service is still working on the registration.
    pub operation_id: Option<String>,
    pub registration_id: Option<String>,
    pub assigned_hub: Option<String>,
    pub device_id: Option<String>,
    pub generation_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Option<String>,
    pub last_updated_at: Option<String>,
    pub etag: Option<String>,
}

impl RegistrationOutcome {
    /// Parse a register or status response body.
    ///
    /// A body without a status that carries an error code is the service
    /// rejecting the request and becomes [`Error::Hub`]; anything else that
    /// does not describe an outcome is a client error.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let response: RegistrationResponse = serde_json::from_slice(body)?;
        let RegistrationResponse {
            operation_id,
            status,
            state,
            registration_state,
        } = response;
        let nested = registration_state.unwrap_or_default();

        let status = match status.or(nested.status.clone()).or(state.status.clone()) {
            Some(status) => status.parse::<RegistrationStatus>()?,
            None => {
                let code = state.error_code.or(nested.error_code);
                let message = state
                    .error_message
                    .or(state.message)
                    .or(nested.error_message)
                    .or(nested.message);
                return match (code, message) {
                    (Some(code), message) => Err(Error::Hub {
                        message: message.unwrap_or_else(|| "registration rejected".to_string()),
                        code: Some(code),
                    }),
                    (None, _) => Err(Error::client("response carries no registration status")),
                };
            }
        };

        Ok(Self {
            status,
            operation_id,
            registration_id: nested.registration_id.or(state.registration_id),
            assigned_hub: nested.assigned_hub.or(state.assigned_hub),
            device_id: nested.device_id.or(state.device_id),
            generation_id: nested.generation_id.or(state.generation_id),
            error_code: nested.error_code.or(state.error_code),
            error_message: nested
                .error_message
                .or(nested.message)
                .or(state.error_message)
                .or(state.message),
            created_at: nested.created_date_time_utc.or(state.created_date_time_utc),
            last_updated_at: nested.last_updated_date_time_utc.or(state.last_updated_date_time_utc),
            etag: nested.etag.or(state.etag),
        })
    }

    /// A FAILED outcome standing in for a service rejection seen while polling.
    pub(crate) fn rejected(code: Option<String>, message: String) -> Self {
        Self {
            status: RegistrationStatus::Failed,
            operation_id: None,
            registration_id: None,
            assigned_hub: None,
            device_id: None,
            generation_id: None,
            error_code: code,
            error_message: Some(message),
            created_at: None,
            last_updated_at: None,
            etag: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResponse {
    operation_id: Option<String>,
    status: Option<String>,
    #[serde(flatten)]
    state: RegistrationState,
    registration_state: Option<RegistrationState>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationState {
    registration_id: Option<String>,
    status: Option<String>,
    assigned_hub: Option<String>,
    device_id: Option<String>,
    generation_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    error_code: Option<String>,
    error_message: Option<String>,
    /// Service error bodies put their text here instead of `errorMessage`.
    message: Option<String>,
    created_date_time_utc: Option<String>,
    last_updated_date_time_utc: Option<String>,
    etag: Option<String>,
}

/// The service sends error codes as numbers, older revisions as strings.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Register request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration<'a> {
    pub registration_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmAttestation>,
}

impl<'a> DeviceRegistration<'a> {
    pub fn x509(registration_id: &'a str) -> Self {
        Self {
            registration_id,
            tpm: None,
        }
    }

    pub fn tpm(registration_id: &'a str, endorsement_key: &[u8], storage_root_key: &[u8]) -> Self {
        Self {
            registration_id,
            tpm: Some(TpmAttestation {
                endorsement_key: B64.encode(endorsement_key),
                storage_root_key: B64.encode(storage_root_key),
            }),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestation {
    pub endorsement_key: String,
    pub storage_root_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TpmAuthKey {
    authentication_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NonceResponse {
    authentication_key: Option<String>,
    tpm: Option<TpmAuthKey>,
    #[serde(default, deserialize_with = "string_or_number")]
    error_code: Option<String>,
    error_message: Option<String>,
    message: Option<String>,
}

/// Extract the base64 authentication key from a nonce response.
pub fn parse_authentication_key(body: &[u8]) -> Result<String> {
    let response: NonceResponse = serde_json::from_slice(body)?;
    let key = response
        .authentication_key
        .or_else(|| response.tpm.and_then(|tpm| tpm.authentication_key))
        .filter(|key| !key.is_empty());

    match (key, response.error_code) {
        (Some(key), _) => Ok(key),
        (None, Some(code)) => Err(Error::Hub {
            code: Some(code),
            message: response
                .error_message
                .or(response.message)
                .unwrap_or_else(|| "nonce request rejected".to_string()),
        }),
        (None, None) => Err(Error::Authentication(
            "nonce response carried no authentication key".into(),
        )),
    }
}
