use std::collections::HashMap;

/// Response sent back to the hub for a direct method invocation
#[derive(Debug)]
pub struct DirectMethodResponse {
    pub(crate) status: i32,
    pub(crate) request_id: String,
    pub(crate) body: String,
}

impl DirectMethodResponse {
    /// Make a new direct method response
    pub fn new(request_id: String, status: i32, body: Option<String>) -> Self {
        Self {
            status,
            request_id,
            body: body.unwrap_or_default(),
        }
    }

    /// Status code reported to the caller
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Request id this response belongs to
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Response body reported to the caller
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Details about a direct method invocation received from the hub
#[derive(Debug)]
pub struct DirectMethodInvocation {
    /// Name of the invoked method
    pub method_name: String,
    /// Opaque method payload
    pub payload: Vec<u8>,
    /// Request id to echo back in the response topic
    pub request_id: String,
}

/// Device to cloud message
#[derive(Default, Debug)]
pub struct Message {
    /// Contents of the message body
    pub body: Vec<u8>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) system_properties: HashMap<String, String>,
}

impl Message {
    /// Create with contents of body as message bytes
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// Get a builder instance for building up a message
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }
}

/// Builder for constructing Message instances
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Option<Vec<u8>>,
    properties: HashMap<String, String>,
    system_properties: HashMap<String, String>,
}

impl MessageBuilder {
    /// Set the message body
    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.message = Some(body);
        self
    }

    /// Set the identifier for this message
    pub fn set_message_id(self, message_id: String) -> Self {
        self.set_system_property("$.mid", message_id)
    }

    /// Set the content-type for this message, such as `text/plain`.
    /// To allow routing query on the message body, this value should be set to `application/json`
    pub fn set_content_type(self, content_type: String) -> Self {
        self.set_system_property("$.ct", content_type)
    }

    /// Set the content-encoding for this message.
    /// If the content-type is set to `application/json`, allowed values are `UTF-8`, `UTF-16`, `UTF-32`.
    pub fn set_content_encoding(self, content_encoding: String) -> Self {
        self.set_system_property("$.ce", content_encoding)
    }

    /// System properties that are user settable
    /// https://docs.microsoft.com/bs-cyrl-ba/azure/iot-hub/iot-hub-devguide-messages-construct#system-properties-of-d2c-iot-hub-messages
    fn set_system_property(mut self, property_name: &str, value: String) -> Self {
        self.system_properties
            .insert(property_name.to_owned(), value);
        self
    }

    /// Add an application property. The hub can route on these without
    /// access to the message body, e.g. `temperatureAlert`.
    pub fn add_message_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Build into a message instance
    pub fn build(self) -> Message {
        Message {
            body: self.message.unwrap(),
            properties: self.properties,
            system_properties: self.system_properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_content_type() {
        let builder = Message::builder();
        let msg = builder
            .set_content_type("application/json".to_owned())
            .set_body(vec![])
            .build();

        assert_eq!(msg.system_properties["$.ct"], "application/json");
    }

    #[test]
    fn test_setting_alert_property() {
        let msg = Message::builder()
            .set_body(vec![])
            .add_message_property("temperatureAlert".to_owned(), "false".to_owned())
            .build();

        assert_eq!(msg.properties["temperatureAlert"], "false");
    }
}
