//! Service call type for invoking Home Assistant services

use crate::{Context, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A call to a Home Assistant service such as `light.turn_on`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// The domain the service belongs to (e.g., "light", "switch", "openhasp")
    pub domain: String,

    /// The service name (e.g., "turn_on", "next_page")
    pub service: String,

    /// Data passed to the service (e.g., entity_id, page)
    pub service_data: Value,

    /// Context tracking who initiated this call
    pub context: Context,
}

impl ServiceCall {
    /// Create a new service call
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// Create a call targeting a single entity with no other data
    pub fn for_entity(
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_id: &EntityId,
        context: Context,
    ) -> Self {
        let mut data = Map::new();
        data.insert("entity_id".into(), Value::String(entity_id.to_string()));
        Self::new(domain, service, Value::Object(data), context)
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Get a value from service_data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get entity_id(s) from service data, accepting a string or a list
    pub fn entity_ids(&self) -> Vec<String> {
        match self.service_data.get("entity_id") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        }
    }
}

/// Split a `domain.service` string into its parts
pub fn split_service_id(service_id: &str) -> Option<(&str, &str)> {
    let (domain, service) = service_id.split_once('.')?;
    if domain.is_empty() || service.is_empty() || service.contains('.') {
        return None;
    }
    Some((domain, service))
}
