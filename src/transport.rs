use crate::message::{DirectMethodResponse, Message};
use async_trait::async_trait;

/// Capabilities the simulator needs from the hub connection
///
/// The telemetry loop and the method listener are generic over this trait so
/// tests can drive them against an in-memory transport.
#[async_trait]
pub trait Transport {
    /// Publish a device to cloud message and resolve once the hub has
    /// acknowledged its delivery
    async fn send_message(&mut self, message: Message) -> crate::Result<()>;

    /// Publish the response to a direct method invocation
    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()>;

    /// Send a keep-alive ping to the hub
    async fn ping(&mut self) -> crate::Result<()>;

    /// Release the hub connection
    async fn shutdown(&mut self) -> crate::Result<()>;
}
