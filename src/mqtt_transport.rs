use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::*;
use mqtt::topic_name::TopicNameError;
use mqtt::Encodable;
use mqtt::{QualityOfService, TopicFilter, TopicName};
use tokio::io::AsyncWriteExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{channel, Receiver};
use tokio::sync::{oneshot, Mutex};
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::error::Error;
use crate::message::{DirectMethodInvocation, DirectMethodResponse, Message};
use crate::token::TokenSource;
use crate::transport::Transport;

// Incoming topic names
const METHOD_POST_TOPIC_FILTER: &str = "$iothub/methods/POST/#";
const METHOD_POST_TOPIC_PREFIX: &str = "$iothub/methods/POST/";

// Outgoing topic names
fn method_response_topic(status: i32, request_id: &str) -> String {
    format!("$iothub/methods/res/{}/?$rid={}", status, request_id)
}

fn cloud_bound_messages_topic(device_id: &str) -> String {
    format!("devices/{}/messages/events/", device_id)
}

// Seconds of silence after which the broker may drop the connection
const KEEP_ALIVE: u16 = 10;
const REQUEST_ID_PARAM: &str = "?$rid=";

async fn tcp_connect(iot_hub: &str) -> crate::Result<TlsStream<TcpStream>> {
    let socket = TcpStream::connect((iot_hub, 8883)).await?;

    trace!("Connected to tcp socket {:?}", socket);

    let cx = TlsConnector::from(
        native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?,
    );

    let socket = cx.connect(iot_hub, socket).await?;

    trace!("Connected tls context {:?}", cx);

    Ok(socket)
}

async fn mqtt_connect(
    iot_hub: &str,
    device_id: &str,
    username: impl ToString,
    password: impl ToString,
) -> crate::Result<TlsStream<TcpStream>> {
    let mut socket = tcp_connect(iot_hub).await?;

    let mut conn = ConnectPacket::new(device_id);
    conn.set_client_identifier(device_id);
    conn.set_clean_session(false);
    conn.set_keep_alive(KEEP_ALIVE);
    conn.set_user_name(Some(username.to_string()));
    conn.set_password(Some(password.to_string()));

    let mut buf = Vec::new();
    conn.encode(&mut buf).unwrap();
    socket.write_all(&buf[..]).await?;

    let packet = VariablePacket::parse(&mut socket).await;

    trace!("PACKET {:?}", packet);
    match packet {
        Ok(VariablePacket::ConnackPacket(connack)) => {
            if connack.connect_return_code() != ConnectReturnCode::ConnectionAccepted {
                Err(Error::ConnectionRefused(format!(
                    "{:?}",
                    connack.connect_return_code()
                )))
            } else {
                Ok(())
            }
        }
        Ok(pck) => Err(Error::UnexpectedConnectPacket(format!("{:?}", pck))),
        Err(err) => Err(Error::PacketDecode(format!("{:?}", err))),
    }?;

    Ok(socket)
}

/// MQTT connection to the hub
///
/// Telemetry publishes use QoS 1; `send_message` registers a oneshot in
/// `pending_acks` keyed by packet id and resolves when the reader task routes
/// the matching PUBACK back, so the returned future *is* the delivery
/// acknowledgement.
#[derive(Debug, Clone)]
pub(crate) struct MqttTransport {
    write_socket: Arc<Mutex<WriteHalf<TlsStream<TcpStream>>>>,
    read_socket: Arc<Mutex<ReadHalf<TlsStream<TcpStream>>>>,
    d2c_topic: TopicName,
    pending_acks: Arc<Mutex<HashMap<u16, oneshot::Sender<()>>>>,
    packet_id: Arc<AtomicU16>,
}

impl MqttTransport {
    pub(crate) async fn new<TS>(
        hub_name: &str,
        device_id: &str,
        token_source: TS,
    ) -> crate::Result<MqttTransport>
    where
        TS: TokenSource + Sync + Send,
    {
        let user_name = format!("{}/{}/?api-version=2018-06-30", hub_name, device_id);

        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);
        let token = token_source.get(&expiry);

        let socket = mqtt_connect(hub_name, device_id, user_name, token).await?;

        let (read_socket, write_socket) = tokio::io::split(socket);

        Ok(Self {
            write_socket: Arc::new(Mutex::new(write_socket)),
            read_socket: Arc::new(Mutex::new(read_socket)),
            d2c_topic: TopicName::new(cloud_bound_messages_topic(device_id)).unwrap(),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            packet_id: Arc::new(AtomicU16::new(1)),
        })
    }

    // Packet identifiers must be non-zero for QoS 1 publishes
    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn write_packet(&self, buf: &[u8]) -> crate::Result<()> {
        self.write_socket
            .lock()
            .await
            .write_all(buf)
            .await
            .map_err(|e| e.into())
    }

    /// Subscribe to the direct method topic and hand back a channel of
    /// invocations. Spawns the task that owns the read half of the socket.
    pub(crate) async fn get_receiver(&mut self) -> Receiver<DirectMethodInvocation> {
        let (handler_tx, handler_rx) = channel::<DirectMethodInvocation>(3);

        let mut cloned_self = self.clone();
        let _ = tokio::spawn(async move {
            loop {
                let mut socket = cloned_self.read_socket.lock().await;
                let packet = match VariablePacket::parse(&mut *socket).await {
                    Ok(pk) => pk,
                    Err(err) => {
                        // Decode failures after a dropped connection repeat
                        // forever, so stop the reader rather than spin
                        error!("Error in receiving packet {:?}", err);
                        break;
                    }
                };
                drop(socket);

                trace!("Received PACKET {:?}", packet);
                match packet {
                    VariablePacket::PingrespPacket(..) => {
                        debug!("Receiving PINGRESP from broker ..");
                    }
                    VariablePacket::PubackPacket(ref ack) => {
                        let packet_id = ack.packet_identifier();
                        match cloned_self.pending_acks.lock().await.remove(&packet_id) {
                            Some(tx) => {
                                // Receiver may have timed out and gone away
                                let _ = tx.send(());
                            }
                            None => warn!("PUBACK for unknown packet id {}", packet_id),
                        }
                    }
                    VariablePacket::SubackPacket(ref ack) => {
                        debug!("Subscription acknowledged: {:?}", ack.packet_identifier());
                    }
                    VariablePacket::PublishPacket(ref publ) => {
                        if let Some(invocation) =
                            parse_method_invocation(publ.topic_name(), publ.payload_ref())
                        {
                            if handler_tx.send(invocation).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => {}
                }
            }

            // The invocation receiver has gone away or the socket died;
            // stop listening for method calls
            cloned_self.unsubscribe().await;
        });

        self.subscribe().await;

        handler_rx
    }

    async fn subscribe(&mut self) {
        let topics = vec![(
            TopicFilter::new(METHOD_POST_TOPIC_FILTER).unwrap(),
            QualityOfService::Level0,
        )];

        trace!("Subscribing to {:?}", topics);

        let subscribe_packet = SubscribePacket::new(10, topics);
        let mut buf = Vec::new();
        subscribe_packet.encode(&mut buf).unwrap();
        if let Err(e) = self.write_packet(&buf[..]).await {
            error!("Failed to subscribe to method topic: {}", e);
        }
    }

    async fn unsubscribe(&mut self) {
        let topics = vec![TopicFilter::new(METHOD_POST_TOPIC_FILTER).unwrap()];

        trace!("Unsubscribing from {:?}", topics);

        let unsubscribe_packet = UnsubscribePacket::new(10, topics);
        let mut buf = Vec::new();
        unsubscribe_packet.encode(&mut buf).unwrap();
        // If the connection is lost, there is nothing to clean up
        let _ = self.write_packet(&buf[..]).await;
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        let full_topic = build_topic_name(&self.d2c_topic, &message).unwrap();
        trace!("Sending message {:?} to topic {:?}", message, full_topic);

        let packet_id = self.next_packet_id();
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut pending = self.pending_acks.lock().await;
            // Entries whose waiter timed out will never be claimed
            pending.retain(|_, tx| !tx.is_closed());
            pending.insert(packet_id, ack_tx);
        }

        let publish_packet = PublishPacket::new(
            full_topic,
            QoSWithPacketIdentifier::Level1(packet_id),
            message.body,
        );
        let mut buf = Vec::new();
        publish_packet.encode(&mut buf).unwrap();
        self.write_packet(&buf[..]).await?;

        ack_rx.await.map_err(|_| Error::AcknowledgementLost)
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()> {
        trace!(
            "Responding to direct method with rid = {}",
            response.request_id
        );
        let publish_packet = PublishPacket::new(
            TopicName::new(method_response_topic(response.status, &response.request_id)).unwrap(),
            QoSWithPacketIdentifier::Level0,
            response.body,
        );
        let mut buf = Vec::new();
        publish_packet.encode(&mut buf).unwrap();
        self.write_packet(&buf[..]).await
    }

    async fn ping(&mut self) -> crate::Result<()> {
        debug!("Sending PINGREQ to broker");

        let pingreq_packet = PingreqPacket::new();

        let mut buf = Vec::new();
        pingreq_packet.encode(&mut buf).unwrap();
        self.write_packet(&buf).await
    }

    async fn shutdown(&mut self) -> crate::Result<()> {
        self.unsubscribe().await;

        let disconnect_packet = DisconnectPacket::new();
        let mut buf = Vec::new();
        disconnect_packet.encode(&mut buf).unwrap();
        self.write_packet(&buf).await
    }
}

/// Extract a method invocation from a publish on
/// `$iothub/methods/POST/{method name}/?$rid={request id}`
fn parse_method_invocation(topic_name: &str, payload: &[u8]) -> Option<DirectMethodInvocation> {
    let details = topic_name.strip_prefix(METHOD_POST_TOPIC_PREFIX)?;

    let mut components = details.split('/');
    let method_name = components.next()?;
    let request_id = components.next()?.strip_prefix(REQUEST_ID_PARAM)?;
    if method_name.is_empty() || request_id.is_empty() {
        return None;
    }

    Some(DirectMethodInvocation {
        method_name: method_name.to_string(),
        payload: payload.to_vec(),
        request_id: request_id.to_string(),
    })
}

fn build_topic_name(
    base_topic: &TopicName,
    message: &Message,
) -> Result<TopicName, TopicNameError> {
    let capacity = message.system_properties.len() + message.properties.len();
    let mut props = std::collections::HashMap::with_capacity(capacity);
    props.extend(message.system_properties.iter());
    props.extend(message.properties.iter());

    // if we reuse the base_topic string as the target for the serializer,
    // we end up with an extra ampersand before the key/value pairs
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(props.iter())
        .finish();
    TopicName::new(format!("{}{}", base_topic.to_string(), encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_property_is_appended_to_topic_name() {
        let message = Message::builder()
            .set_body(vec![])
            .add_message_property("temperatureAlert".to_owned(), "true".to_owned())
            .build();

        let base_topic = TopicName::new("devices/MyCrane/messages/events/").unwrap();

        let topic_with_properties = build_topic_name(&base_topic, &message).unwrap().to_string();

        assert_eq!(
            "devices/MyCrane/messages/events/temperatureAlert=true",
            topic_with_properties
        );
    }

    #[test]
    fn content_type_is_percent_encoded_in_topic_name() {
        let message = Message::builder()
            .set_body(vec![])
            .set_content_type("application/json".to_owned())
            .build();

        let base_topic = TopicName::new("topic/").unwrap();

        let topic_with_properties = build_topic_name(&base_topic, &message).unwrap().to_string();

        assert_eq!("topic/%24.ct=application%2Fjson", topic_with_properties);
    }

    #[test]
    fn no_properties_leaves_topic_unchanged() {
        let message = Message::new(vec![]);
        let base_topic = TopicName::new("topic/").unwrap();
        let actual = build_topic_name(&base_topic, &message).unwrap();
        assert_eq!(base_topic, actual);
    }

    #[test]
    fn parses_method_invocation_topic() {
        let invocation = parse_method_invocation(
            "$iothub/methods/POST/SetTelemetryInterval/?$rid=42",
            b"5",
        )
        .unwrap();
        assert_eq!(invocation.method_name, "SetTelemetryInterval");
        assert_eq!(invocation.request_id, "42");
        assert_eq!(invocation.payload, b"5");
    }

    #[test]
    fn non_method_topic_is_ignored() {
        assert!(parse_method_invocation("devices/MyCrane/messages/devicebound/", b"").is_none());
        assert!(parse_method_invocation("$iothub/methods/POST/", b"").is_none());
    }

    #[test]
    fn method_response_topic_includes_status_and_request_id() {
        assert_eq!(
            method_response_topic(200, "42"),
            "$iothub/methods/res/200/?$rid=42"
        );
    }
}
