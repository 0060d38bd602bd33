//! MQTT transport over rumqttc

use async_trait::async_trait;
use hasp_config::MqttConfig;
use hasp_plate::{MqttPublisher, TransportError, TransportResult};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, SubscribeFilter};
use std::time::Duration;
use tracing::{debug, info};

/// Request queue depth between the client handle and the event loop
const CLIENT_CAPACITY: usize = 64;

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    info!(host = %config.host, port = config.port, client_id = %config.client_id, "Connecting to MQTT broker");
    AsyncClient::new(mqtt_options(config), CLIENT_CAPACITY)
}

/// Plate commands go out at QoS 0, never retained
#[derive(Clone)]
pub struct RumqttPublisher {
    client: AsyncClient,
}

impl RumqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    /// Subscribe to every topic in one request, e.g. after a (re)connect
    ///
    /// Only queues the request: this runs inside the event loop that sends it.
    pub fn subscribe_all(&self, topics: &[String]) -> TransportResult<()> {
        if topics.is_empty() {
            return Ok(());
        }
        debug!(count = topics.len(), "Subscribing");
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        self.client
            .try_subscribe_many(filters)
            .map_err(|err| TransportError::Publish {
                topic: "<subscribe>".to_string(),
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl MqttPublisher for RumqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> TransportResult<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config: MqttConfig =
            serde_yaml::from_str("host: broker.lan\nusername: hasp\npassword: secret\n").unwrap();
        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("broker.lan".to_string(), 1883));
        assert_eq!(options.client_id(), "openhasp-bridge");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }
}
