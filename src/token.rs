use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

const DEVICEID_KEY: &str = "DeviceId";
const HOSTNAME_KEY: &str = "HostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";

/// Source of SAS tokens to authenticate with the hub
pub trait TokenSource {
    /// Produce a token valid until `expiry`
    fn get(&self, expiry: &DateTime<Utc>) -> String;
}

/// Token source deriving SAS tokens from the device's shared access key
#[derive(Debug, Clone)]
pub struct DeviceKeyTokenSource {
    resource_uri: String,
    key: Vec<u8>,
}

impl DeviceKeyTokenSource {
    /// Create a token source for a device key. Fails if the key is not
    /// valid base64.
    pub fn new(hub: &str, device_id: &str, key: &str) -> crate::Result<Self> {
        Ok(Self {
            resource_uri: format!("{}/devices/{}", hub, device_id),
            key: base64::decode(key)?,
        })
    }

    /// Create a token source from a full device connection string
    pub fn from_connection_string(connection_string: &str) -> crate::Result<Self> {
        let (hub, device_id, key) = parse_connection_string(connection_string)?;
        Self::new(hub, device_id, key)
    }
}

/// Split a `HostName=...;DeviceId=...;SharedAccessKey=...` connection string
/// into its parts
pub fn parse_connection_string(
    connection_string: &str,
) -> crate::Result<(&str, &str, &str)> {
    let mut hub = None;
    let mut device_id = None;
    let mut key = None;

    for part in connection_string.split(';') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some(HOSTNAME_KEY), Some(v)) => hub = Some(v),
            (Some(DEVICEID_KEY), Some(v)) => device_id = Some(v),
            (Some(SHAREDACCESSKEY_KEY), Some(v)) => key = Some(v),
            // Ignore extraneous components in the connection string
            _ => (),
        }
    }

    use crate::error::Error::ConnectionStringMissingRequiredParameter as Missing;
    let hub = hub.ok_or(Missing(HOSTNAME_KEY))?;
    let device_id = device_id.ok_or(Missing(DEVICEID_KEY))?;
    let key = key.ok_or(Missing(SHAREDACCESSKEY_KEY))?;
    Ok((hub, device_id, key))
}

impl TokenSource for DeviceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> String {
        let expiry_timestamp = expiry.timestamp();

        const FRAGMENT: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS.add(b'/');

        // The signature covers the percent-encoded URI, not the raw one
        let resource_uri = percent_encoding::utf8_percent_encode(&self.resource_uri, FRAGMENT);
        let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);

        let signature = sign(&self.key, &to_sign);

        let sas = format!(
            "SharedAccessSignature sr={}&{}&se={}",
            resource_uri, signature, expiry_timestamp
        );

        trace!("Using device key token: {}", sas);

        sas
    }
}

fn sign(key: &[u8], message: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(message.as_bytes());
    let signature = base64::encode(mac.finalize().into_bytes());

    let pairs = &vec![("sig", signature)];
    serde_urlencoded::to_string(pairs).unwrap()
}
