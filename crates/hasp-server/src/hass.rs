//! Home Assistant side: REST service calls and `mqtt_statestream` ingestion

use hasp_core::{Context, EntityId, ServiceCall};
use hasp_plate::{TransportError, TransportResult};
use hasp_state_machine::StateMachine;
use reqwest::{header, Client};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Calls services through Home Assistant's REST API
#[derive(Clone)]
pub struct HaClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HaClient {
    pub fn new(base_url: &str, token: &str) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TransportError::Service {
                service: "http".to_string(),
                message: err.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn service_url(&self, call: &ServiceCall) -> String {
        format!(
            "{}/api/services/{}/{}",
            self.base_url, call.domain, call.service
        )
    }

    /// `POST /api/services/<domain>/<service>` with the call data as body
    #[instrument(skip(self, call), fields(service = %call.service_id()))]
    pub async fn call_service(&self, call: &ServiceCall) -> TransportResult<()> {
        let failed = |message: String| TransportError::Service {
            service: call.service_id(),
            message,
        };

        let response = self
            .client
            .post(self.service_url(call))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .json(&call.service_data)
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        debug!(%status, "Service called");
        Ok(())
    }
}

/// One message from `mqtt_statestream`
#[derive(Debug, Clone, PartialEq)]
pub enum StatestreamUpdate {
    State { entity_id: EntityId, state: String },
    Attribute {
        entity_id: EntityId,
        name: String,
        value: Value,
    },
}

/// Topics statestream publishes besides state and attributes
const IGNORED_LEAVES: &[&str] = &["last_changed", "last_updated", "last_reported"];

/// Parse `<prefix>/<domain>/<object_id>/<leaf>`
///
/// The `state` leaf carries the bare state; every other leaf is an attribute
/// whose payload is JSON (falling back to the raw string).
pub fn parse_statestream(prefix: &str, topic: &str, payload: &[u8]) -> Option<StatestreamUpdate> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut parts = rest.splitn(3, '/');
    let (domain, object_id, leaf) = (parts.next()?, parts.next()?, parts.next()?);

    if IGNORED_LEAVES.contains(&leaf) {
        return None;
    }

    let entity_id = match EntityId::new(domain, object_id) {
        Ok(entity_id) => entity_id,
        Err(err) => {
            warn!(%topic, %err, "Statestream topic does not name an entity");
            return None;
        }
    };
    let text = String::from_utf8_lossy(payload);

    if leaf == "state" {
        return Some(StatestreamUpdate::State {
            entity_id,
            state: text.trim().trim_matches('"').to_string(),
        });
    }

    let value = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.to_string()));
    Some(StatestreamUpdate::Attribute {
        entity_id,
        name: leaf.to_string(),
        value,
    })
}

/// Apply a statestream message to the local state machine
pub fn ingest_statestream(states: &StateMachine, prefix: &str, topic: &str, payload: &[u8]) {
    match parse_statestream(prefix, topic, payload) {
        Some(StatestreamUpdate::State { entity_id, state }) => {
            trace!(%entity_id, %state, "Statestream state");
            states.set_state(entity_id, state, Context::new());
        }
        Some(StatestreamUpdate::Attribute {
            entity_id,
            name,
            value,
        }) => {
            trace!(%entity_id, attribute = %name, "Statestream attribute");
            states.set_attribute(entity_id, name, value, Context::new());
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasp_event_bus::EventBus;
    use serde_json::json;
    use std::sync::Arc;

    const PREFIX: &str = "homeassistant/statestream";

    #[test]
    fn test_parse_state() {
        let update =
            parse_statestream(PREFIX, "homeassistant/statestream/light/kitchen/state", b"on");
        assert_eq!(
            update,
            Some(StatestreamUpdate::State {
                entity_id: "light.kitchen".parse().unwrap(),
                state: "on".to_string()
            })
        );
    }

    #[test]
    fn test_parse_attribute_json() {
        let update = parse_statestream(
            PREFIX,
            "homeassistant/statestream/light/kitchen/brightness",
            b"128",
        );
        assert!(matches!(
            update,
            Some(StatestreamUpdate::Attribute { ref name, ref value, .. })
                if name == "brightness" && *value == json!(128)
        ));
    }

    #[test]
    fn test_parse_ignores_foreign_topics() {
        assert!(parse_statestream(PREFIX, "hasp/plate1/LWT", b"online").is_none());
        assert!(parse_statestream(
            PREFIX,
            "homeassistant/statestream/light/kitchen/last_changed",
            b"\"2024-01-01T00:00:00\""
        )
        .is_none());
        assert!(parse_statestream(PREFIX, "homeassistant/statestream/light", b"x").is_none());
    }

    #[test]
    fn test_ingest_updates_state_machine() {
        let states = StateMachine::new(Arc::new(EventBus::new()));
        ingest_statestream(
            &states,
            PREFIX,
            "homeassistant/statestream/sensor/temperature/unit_of_measurement",
            b"\"\xc2\xb0C\"",
        );
        ingest_statestream(
            &states,
            PREFIX,
            "homeassistant/statestream/sensor/temperature/state",
            b"21.5",
        );

        let state = states.get("sensor.temperature").unwrap();
        assert_eq!(state.state, "21.5");
        assert_eq!(
            state.attribute::<String>("unit_of_measurement").as_deref(),
            Some("°C")
        );
    }

    #[test]
    fn test_service_url() {
        let client = HaClient::new("http://ha.local:8123/", "token").unwrap();
        let call = ServiceCall::new("light", "turn_on", json!({}), Context::new());
        assert_eq!(
            client.service_url(&call),
            "http://ha.local:8123/api/services/light/turn_on"
        );
    }
}
