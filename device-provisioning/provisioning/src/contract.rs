//! Seam between the registration engine and a wire protocol.
//!
//! An implementation sends the request however its protocol requires and
//! hands the response body to the supplied [`ResponseCallback`], on whatever
//! thread it likes. Returning `Err` from one of the operations means the
//! request was rejected before anything was sent.

use serde::Deserialize;
use std::fmt;

use crate::correlator::ResponseCallback;
use crate::error::Result;
use crate::security::TlsCredential;

/// Wire protocols a contract can speak. Chosen once, in configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    #[default]
    Https,
    Amqps,
    AmqpsWs,
    Mqtt,
    MqttWs,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Https => "https",
            Protocol::Amqps => "amqps",
            Protocol::AmqpsWs => "amqps-ws",
            Protocol::Mqtt => "mqtt",
            Protocol::MqttWs => "mqtt-ws",
        })
    }
}

/// First leg of the TPM exchange: present EK/SRK, receive the encrypted nonce.
#[derive(Debug, Clone, Copy)]
pub struct NonceRequest<'a> {
    pub body: &'a [u8],
    pub registration_id: &'a str,
    pub tls_credential: &'a TlsCredential,
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterRequest<'a> {
    pub body: &'a [u8],
    pub registration_id: &'a str,
    pub tls_credential: &'a TlsCredential,
    /// Present for key attestation, absent for X.509.
    pub bearer_token: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusRequest<'a> {
    pub operation_id: &'a str,
    pub registration_id: &'a str,
    pub bearer_token: Option<&'a str>,
    pub tls_credential: &'a TlsCredential,
}

pub trait ProvisioningContract: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn request_nonce(&self, request: NonceRequest<'_>, callback: ResponseCallback) -> Result<()>;

    fn authenticate(&self, request: RegisterRequest<'_>, callback: ResponseCallback) -> Result<()>;

    fn get_status(&self, request: StatusRequest<'_>, callback: ResponseCallback) -> Result<()>;
}
