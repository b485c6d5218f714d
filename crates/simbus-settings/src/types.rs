//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may name only the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use simbus_codec::EncoderKind;
use simbus_core::ClientIdentifier;
use simbus_core::constants::DEFAULT_REQUEST_TIMEOUT_MS;

use crate::errors::{Result, SettingsError};

/// Upper bound for `requestTimeoutMs` (one hour).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 3_600_000;

/// Upper bound for `encoderPoolSize`.
pub const MAX_ENCODER_POOL_SIZE: usize = 1024;

/// Root settings type for a simbus client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Who this client is.
    pub identity: IdentitySettings,
    /// Default time to collect replies to a request.
    pub request_timeout_ms: u64,
    /// Codec used for outbound packets.
    pub default_codec: EncoderKind,
    /// Idle encoders kept per codec.
    pub encoder_pool_size: usize,
    /// Which transport to open and where.
    pub transport: TransportSettings,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            identity: IdentitySettings::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            default_codec: EncoderKind::Json,
            encoder_pool_size: 4,
            transport: TransportSettings::default(),
        }
    }
}

impl BusSettings {
    /// The configured request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build the client identity.
    pub fn client_identifier(&self) -> Result<ClientIdentifier> {
        let id = &self.identity;
        Ok(ClientIdentifier::new(
            id.namespace.iter().cloned(),
            id.app_id.clone(),
            id.group_id.clone(),
            id.client_id.clone(),
        )?)
    }

    /// Check ranges and the identity.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(SettingsError::OutOfRange {
                key: "requestTimeoutMs",
                reason: format!(
                    "must be within 1..={MAX_REQUEST_TIMEOUT_MS}, got {}",
                    self.request_timeout_ms
                ),
            });
        }
        if self.encoder_pool_size > MAX_ENCODER_POOL_SIZE {
            return Err(SettingsError::OutOfRange {
                key: "encoderPoolSize",
                reason: format!(
                    "must be at most {MAX_ENCODER_POOL_SIZE}, got {}",
                    self.encoder_pool_size
                ),
            });
        }
        if self.transport.access_name.is_empty() {
            return Err(SettingsError::OutOfRange {
                key: "transport.accessName",
                reason: "must not be empty".to_string(),
            });
        }
        let _ = self.client_identifier()?;
        Ok(())
    }
}

/// Identity segments of the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Namespace prefix segments.
    pub namespace: Vec<String>,
    /// Application id.
    pub app_id: String,
    /// Group id.
    pub group_id: String,
    /// Client id.
    pub client_id: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            namespace: Vec::new(),
            app_id: "simbus".to_string(),
            group_id: "default".to_string(),
            client_id: "client".to_string(),
        }
    }
}

/// Transport selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Access name of the registered transport to open.
    pub access_name: String,
    /// Broker host (or pseudo-host for in-process transports).
    pub host: String,
    /// Broker port; unused by in-process transports.
    pub port: u16,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            access_name: "memory".to_string(),
            host: "local".to_string(),
            port: 1883,
        }
    }
}
