use thiserror::Error;

/// Errors surfaced by the simulator and its hub transport
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O failure talking to the hub
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// TLS setup or handshake failure
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
    /// The hub rejected the MQTT connect request
    #[error("hub rejected the connection: {0}")]
    ConnectionRefused(String),
    /// Something other than CONNACK arrived while connecting
    #[error("unexpected packet during connect: {0}")]
    UnexpectedConnectPacket(String),
    /// Failed to decode an inbound MQTT packet
    #[error("error decoding packet: {0}")]
    PacketDecode(String),
    /// The connection string was missing a required `Key=value` pair
    #[error("connection string is missing required parameter {0}")]
    ConnectionStringMissingRequiredParameter(&'static str),
    /// The device key was not valid base64
    #[error("device key is not valid base64: {0}")]
    InvalidDeviceKey(#[from] base64::DecodeError),
    /// Startup configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    /// A required startup setting was absent
    #[error("missing configuration: {0}")]
    MissingConfiguration(&'static str),
    /// The transport dropped the pending acknowledgement for a publish
    #[error("connection lost while waiting for acknowledgement")]
    AcknowledgementLost,
    /// Telemetry sample could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
