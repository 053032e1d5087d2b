use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::message::{DirectMethodInvocation, DirectMethodResponse, Message};
use crate::token::{DeviceKeyTokenSource, TokenSource};
use crate::transport::Transport;

pub(crate) type ClientTransport = crate::mqtt_transport::MqttTransport;

/// Client for communicating with the IoT hub
#[derive(Debug, Clone)]
pub struct HubClient {
    device_id: String,
    transport: ClientTransport,
}

impl HubClient {
    /// Create a new hub device client
    ///
    /// # Arguments
    ///
    /// * `hub_name` - The IoT hub resource name
    /// * `device_id` - The registered device to connect as
    /// * `token_source` - The token source to provide authentication
    ///
    /// # Example
    /// ```no_run
    /// use simulated_crane::client::HubClient;
    /// use simulated_crane::token::DeviceKeyTokenSource;
    ///
    /// #[tokio::main]
    /// async fn main() -> simulated_crane::Result<()> {
    ///     let hostname = "iothubname.azure-devices.net";
    ///     let device_id = "MyCrane";
    ///     let token_source = DeviceKeyTokenSource::new(hostname, device_id, "TheAccessKey")?;
    ///
    ///     let client = HubClient::new(hostname, device_id, token_source).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new<TS>(
        hub_name: &str,
        device_id: &str,
        token_source: TS,
    ) -> crate::Result<HubClient>
    where
        TS: TokenSource + Sync + Send,
    {
        let transport = ClientTransport::new(hub_name, device_id, token_source).await?;

        Ok(Self {
            device_id: device_id.to_string(),
            transport,
        })
    }

    /// Create a new hub device client from a device connection string
    pub async fn from_connection_string(connection_string: &str) -> crate::Result<HubClient> {
        let (hub_name, device_id, _) = crate::token::parse_connection_string(connection_string)?;
        let token_source = DeviceKeyTokenSource::from_connection_string(connection_string)?;
        HubClient::new(hub_name, device_id, token_source).await
    }

    /// The device identity this client is connected as
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Subscribe to direct method invocations sent to this device
    pub async fn get_receiver(&mut self) -> Receiver<DirectMethodInvocation> {
        self.transport.get_receiver().await
    }
}

#[async_trait]
impl Transport for HubClient {
    async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        self.transport.send_message(message).await
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()> {
        self.transport.respond_to_direct_method(response).await
    }

    async fn ping(&mut self) -> crate::Result<()> {
        self.transport.ping().await
    }

    async fn shutdown(&mut self) -> crate::Result<()> {
        self.transport.shutdown().await
    }
}
