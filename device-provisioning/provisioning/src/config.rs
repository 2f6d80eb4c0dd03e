use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::contract::Protocol;
use crate::error::{Error, Result};

const DEFAULT_CONFIG_PATH: &str = "/etc/device-provisioning/config.toml";
const CONFIG_PATH_ENV: &str = "DPS_PROVISIONING_CONFIG";

pub const DEFAULT_GLOBAL_ENDPOINT: &str = "global.azure-devices-provisioning.net";
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ATTEMPT_BUDGET: Duration = Duration::from_secs(600);
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);
/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    global_endpoint: Option<String>,
    id_scope: Option<String>,
    #[serde(default)]
    protocol: Protocol,
    operation_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    attempt_budget_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
}

/// Settings for one device's registration attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub global_endpoint: String,
    pub id_scope: String,
    pub protocol: Protocol,
    /// Maximum wait for any single correlated transport call.
    pub operation_timeout: Duration,
    pub poll_interval: Duration,
    /// Wall-clock limit for a whole attempt, register call and polling included.
    pub attempt_budget: Duration,
    pub token_ttl: Duration,
}

impl ProvisioningConfig {
    pub fn new(id_scope: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            global_endpoint: DEFAULT_GLOBAL_ENDPOINT.to_string(),
            id_scope: id_scope.into(),
            protocol,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            attempt_budget: DEFAULT_ATTEMPT_BUDGET,
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Load from the path named by `DPS_PROVISIONING_CONFIG`, falling back
    /// to the system default location.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(Path::new(&path))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::client(format!("failed to read config from {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(raw).map_err(|e| Error::client(format!("failed to parse provisioning config: {e}")))?;

        let id_scope = match raw.id_scope {
            Some(scope) if !scope.trim().is_empty() => scope,
            _ => return Err(Error::client("id_scope is missing or empty")),
        };

        let config = Self {
            global_endpoint: raw
                .global_endpoint
                .unwrap_or_else(|| DEFAULT_GLOBAL_ENDPOINT.to_string()),
            id_scope,
            protocol: raw.protocol,
            operation_timeout: seconds(raw.operation_timeout_secs, DEFAULT_OPERATION_TIMEOUT),
            poll_interval: seconds(raw.poll_interval_secs, DEFAULT_POLL_INTERVAL),
            attempt_budget: seconds(raw.attempt_budget_secs, DEFAULT_ATTEMPT_BUDGET),
            token_ttl: seconds(raw.token_ttl_secs, DEFAULT_TOKEN_TTL),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_scope.trim().is_empty() {
            return Err(Error::client("id_scope is missing or empty"));
        }
        if self.global_endpoint.is_empty() {
            return Err(Error::client("global_endpoint is empty"));
        }
        for (name, value) in [
            ("operation_timeout", self.operation_timeout),
            ("poll_interval", self.poll_interval),
            ("attempt_budget", self.attempt_budget),
            ("token_ttl", self.token_ttl),
        ] {
            if value.is_zero() {
                return Err(Error::client(format!("{name} must be greater than zero")));
            }
            if value > MAX_DURATION {
                return Err(Error::client(format!(
                    "{name} of {}s exceeds the maximum of {}s",
                    value.as_secs(),
                    MAX_DURATION.as_secs()
                )));
            }
        }
        Ok(())
    }
}

fn seconds(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ProvisioningConfig::from_toml_str(r#"id_scope = "0ne00000001""#).unwrap();

        assert_eq!(config.id_scope, "0ne00000001");
        assert_eq!(config.global_endpoint, DEFAULT_GLOBAL_ENDPOINT);
        assert_eq!(config.protocol, Protocol::Https);
        assert_eq!(config.operation_timeout, Duration::from_secs(90));
        assert_eq!(config.token_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn full_config() {
        let config = ProvisioningConfig::from_toml_str(
            r#"
            global_endpoint = "dps.example.net"
            id_scope = "0ne00000002"
            protocol = "amqps-ws"
            operation_timeout_secs = 30
            poll_interval_secs = 2
            attempt_budget_secs = 120
            token_ttl_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.global_endpoint, "dps.example.net");
        assert_eq!(config.protocol, Protocol::AmqpsWs);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.attempt_budget, Duration::from_secs(120));
    }

    #[test]
    fn missing_scope_is_rejected() {
        let err = ProvisioningConfig::from_toml_str(r#"id_scope = "  ""#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);

        let err = ProvisioningConfig::from_toml_str("poll_interval_secs = 3").unwrap_err();
        assert!(err.to_string().contains("id_scope"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = ProvisioningConfig::from_toml_str(
            r#"
            id_scope = "0ne00000001"
            poll_interval_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn durations_are_bounded() {
        let at_limit = format!(
            "id_scope = \"0ne00000001\"\ntoken_ttl_secs = {}",
            MAX_DURATION.as_secs()
        );
        assert_eq!(
            ProvisioningConfig::from_toml_str(&at_limit).unwrap().token_ttl,
            MAX_DURATION
        );

        let over = format!(
            "id_scope = \"0ne00000001\"\nattempt_budget_secs = {}",
            MAX_DURATION.as_secs() + 1
        );
        let err = ProvisioningConfig::from_toml_str(&over).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(err.to_string().contains("attempt_budget"));

        let err = ProvisioningConfig::from_toml_str(
            "id_scope = \"0ne00000001\"\noperation_timeout_secs = 9223372036854775807",
        )
        .unwrap_err();
        assert!(err.to_string().contains("operation_timeout"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ProvisioningConfig::from_toml_str("id_scope = \"x\"\nscope = \"y\"").is_err());
    }
}
