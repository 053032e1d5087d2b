use crate::token::parse_connection_string;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Telemetry send interval used until the hub says otherwise
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 1000;
/// Metres the crane climbs per tick until the hub says otherwise
pub const DEFAULT_HEIGHT_INCREMENT: f64 = 0.5;

const DEFAULT_ACK_TIMEOUT_SECS: u64 = 30;

fn default_ack_timeout_secs() -> u64 {
    DEFAULT_ACK_TIMEOUT_SECS
}

/// Startup configuration for the simulator
///
/// Loaded from an optional `config` file merged with environment variables,
/// so `DEVICE_ID=MyCrane CONNECTION_STRING=... simulated_crane` works without
/// any file present. Either `connection_string` or the
/// `hostname`/`device_id`/`shared_access_key` triple must be supplied.
#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    /// Full device connection string, `HostName=...;DeviceId=...;SharedAccessKey=...`
    pub connection_string: Option<String>,
    /// IoT hub hostname, e.g. `myhub.azure-devices.net`
    pub hostname: Option<String>,
    /// Registered device identity
    pub device_id: Option<String>,
    /// Base64 device shared access key
    pub shared_access_key: Option<String>,
    /// How long to wait for the hub to acknowledge one telemetry publish
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

impl DeviceConfig {
    /// Load configuration from `config.{toml,json,yaml}` (if present) merged
    /// with environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = config::Config::default();
        cfg.merge(config::File::with_name("config").required(false))?;
        cfg.merge(config::Environment::new())?;
        Ok(cfg.try_into()?)
    }

    /// Resolve `(hostname, device_id, shared_access_key)` from either the
    /// connection string or the individual settings
    pub fn credentials(&self) -> crate::Result<(String, String, String)> {
        if let Some(cs) = &self.connection_string {
            let (hub, device_id, key) = parse_connection_string(cs)?;
            return Ok((hub.to_string(), device_id.to_string(), key.to_string()));
        }

        let hostname = self
            .hostname
            .clone()
            .ok_or(crate::error::Error::MissingConfiguration("hostname"))?;
        let device_id = self
            .device_id
            .clone()
            .ok_or(crate::error::Error::MissingConfiguration("device_id"))?;
        let key = self
            .shared_access_key
            .clone()
            .ok_or(crate::error::Error::MissingConfiguration("shared_access_key"))?;
        Ok((hostname, device_id, key))
    }

    /// Acknowledgement timeout as a [`Duration`]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

/// Runtime state shared between the telemetry loop and the method handler
///
/// The method handler is the only writer and the telemetry loop the only
/// reader, but the two run on different tasks, so each field is an atomic
/// updated as a whole unit. The float increment travels as its bit pattern;
/// a reader always observes a value some writer stored, never a torn one.
/// The two fields are independent, so `Relaxed` ordering is enough.
#[derive(Debug)]
pub struct SharedConfig {
    telemetry_interval_ms: AtomicU64,
    height_increment_bits: AtomicU64,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: AtomicU64::new(DEFAULT_TELEMETRY_INTERVAL_MS),
            height_increment_bits: AtomicU64::new(DEFAULT_HEIGHT_INCREMENT.to_bits()),
        }
    }
}

impl SharedConfig {
    /// Current pause between telemetry ticks
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.load(Ordering::Relaxed))
    }

    /// Current pause between telemetry ticks, in milliseconds
    pub fn telemetry_interval_ms(&self) -> u64 {
        self.telemetry_interval_ms.load(Ordering::Relaxed)
    }

    /// Set the telemetry interval from whole seconds, saturating at the
    /// largest representable interval
    pub fn set_telemetry_interval_secs(&self, seconds: u64) {
        self.telemetry_interval_ms
            .store(seconds.saturating_mul(1000), Ordering::Relaxed);
    }

    /// Metres the crane climbs on the next tick
    pub fn height_increment(&self) -> f64 {
        f64::from_bits(self.height_increment_bits.load(Ordering::Relaxed))
    }

    /// Replace the height increment
    pub fn set_height_increment(&self, increment: f64) {
        self.height_increment_bits
            .store(increment.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_startup_values() {
        let shared = SharedConfig::default();
        assert_eq!(shared.telemetry_interval_ms(), 1000);
        assert_eq!(shared.height_increment(), 0.5);
    }

    #[test]
    fn interval_is_stored_in_milliseconds() {
        let shared = SharedConfig::default();
        shared.set_telemetry_interval_secs(5);
        assert_eq!(shared.telemetry_interval(), Duration::from_millis(5000));
    }

    #[test]
    fn interval_saturates_instead_of_overflowing() {
        let shared = SharedConfig::default();
        shared.set_telemetry_interval_secs(u64::MAX);
        assert_eq!(shared.telemetry_interval_ms(), u64::MAX);
    }

    #[test]
    fn height_increment_round_trips_through_bits() {
        let shared = SharedConfig::default();
        shared.set_height_increment(-0.125);
        assert_eq!(shared.height_increment(), -0.125);
    }

    #[test]
    fn credentials_prefer_connection_string() {
        let cfg = DeviceConfig {
            connection_string: Some(
                "HostName=myhub.azure-devices.net;DeviceId=MyCrane;SharedAccessKey=a2V5".into(),
            ),
            hostname: None,
            device_id: None,
            shared_access_key: None,
            ack_timeout_secs: 30,
        };
        let (hub, device_id, key) = cfg.credentials().unwrap();
        assert_eq!(hub, "myhub.azure-devices.net");
        assert_eq!(device_id, "MyCrane");
        assert_eq!(key, "a2V5");
    }

    #[test]
    fn credentials_require_all_three_settings() {
        let cfg = DeviceConfig {
            connection_string: None,
            hostname: Some("myhub.azure-devices.net".into()),
            device_id: Some("MyCrane".into()),
            shared_access_key: None,
            ack_timeout_secs: 30,
        };
        assert!(cfg.credentials().is_err());
    }
}
