//! Event router: panel events to Home Assistant service calls

use hasp_config::ServiceMapping;
use hasp_core::message::ObjectMessage;
use hasp_core::{split_service_id, Context, ObjectId, ServiceCall};
use hasp_template::{TemplateEngine, TemplateResult};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, trace};

pub struct EventRouter {
    engine: Arc<TemplateEngine>,
}

impl EventRouter {
    pub fn new(engine: Arc<TemplateEngine>) -> Self {
        Self { engine }
    }

    /// Service calls configured for the event carried by `message`, in order
    ///
    /// A mapping whose data fails to render is logged and left out; the rest
    /// of the list is still returned. Every call is caused by `context`.
    pub fn calls_for(
        &self,
        object: ObjectId,
        events: &IndexMap<String, Vec<ServiceMapping>>,
        message: &ObjectMessage,
        context: &Context,
    ) -> Vec<ServiceCall> {
        let Some(event) = &message.event else {
            trace!(%object, "Message carries no event");
            return Vec::new();
        };

        // Keys differing only in case all match, each in configuration order
        let mappings: Vec<&ServiceMapping> = events
            .iter()
            .filter(|(name, _)| event.matches(name))
            .flat_map(|(_, mappings)| mappings)
            .collect();
        if mappings.is_empty() {
            trace!(%object, %event, "No service configured for event");
            return Vec::new();
        }

        debug!(%object, %event, count = mappings.len(), "Routing panel event");

        mappings
            .into_iter()
            .filter_map(|mapping| match self.build_call(mapping, &message.fields, context) {
                Ok(call) => Some(call),
                Err(err) => {
                    error!(%object, %event, service = %mapping.service, %err, "Cannot build service call");
                    None
                }
            })
            .collect()
    }

    fn build_call(
        &self,
        mapping: &ServiceMapping,
        variables: &Map<String, Value>,
        context: &Context,
    ) -> TemplateResult<ServiceCall> {
        let mut data = Map::new();
        for (key, value) in mapping.data.iter().chain(mapping.target.iter()) {
            data.insert(key.clone(), self.render_value(value, variables)?);
        }

        // Validated at config load
        let (domain, service) = split_service_id(&mapping.service).unwrap_or(("", ""));

        Ok(ServiceCall::new(
            domain,
            service,
            Value::Object(data),
            Context::caused_by(context),
        ))
    }

    /// Render template strings, recursing into lists and maps
    fn render_value(&self, value: &Value, variables: &Map<String, Value>) -> TemplateResult<Value> {
        match value {
            Value::String(s) if TemplateEngine::is_template(s) => {
                let rendered = self.engine.render_with_context(s, variables)?;
                // Try to parse as JSON, otherwise keep as string
                Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
            }
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.render_value(v, variables)?)))
                .collect::<TemplateResult<Map<_, _>>>()
                .map(Value::Object),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, variables))
                .collect::<TemplateResult<Vec<_>>>()
                .map(Value::Array),
            _ => Ok(value.clone()),
        }
    }
}
