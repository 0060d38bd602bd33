//! States object for accessing entity states in templates
//!
//! Every lookup made through `states`, `is_state`, `state_attr` or
//! `has_value` is recorded, so the caller learns which entities a template
//! depends on and can re-render it when one of them changes.

use hasp_core::{State, STATE_UNKNOWN};
use hasp_state_machine::StateMachine;
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Entities and domains a render looked at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub entities: BTreeSet<String>,
    /// Domains that were enumerated as a whole (`states.light()`)
    pub domains: BTreeSet<String>,
}

impl Dependencies {
    /// Whether a change of `entity_id` may change the render result
    pub fn matches(&self, entity_id: &str) -> bool {
        if self.entities.contains(entity_id) {
            return true;
        }
        entity_id
            .split_once('.')
            .is_some_and(|(domain, _)| self.domains.contains(domain))
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.domains.is_empty()
    }

    pub fn extend(&mut self, other: Dependencies) {
        self.entities.extend(other.entities);
        self.domains.extend(other.domains);
    }
}

/// The `states` object exposed to templates
///
/// - `states('light.kitchen')` returns the state string, `unknown` if missing
/// - `states.light.kitchen` returns the full state object
/// - `states.light()` lists the states of a domain
pub struct StatesObject {
    state_machine: Arc<StateMachine>,
    seen: Mutex<Dependencies>,
}

impl fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self {
            state_machine,
            seen: Mutex::new(Dependencies::default()),
        }
    }

    fn record_entity(&self, entity_id: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.entities.insert(entity_id.to_string());
        }
    }

    fn record_domain(&self, domain: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.domains.insert(domain.to_string());
        }
    }

    /// Drain what has been recorded so far
    pub fn take_dependencies(&self) -> Dependencies {
        self.seen
            .lock()
            .map(|mut seen| std::mem::take(&mut *seen))
            .unwrap_or_default()
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.record_entity(entity_id);
        self.state_machine.get(entity_id)
    }

    pub fn get_state(&self, entity_id: &str) -> String {
        self.get(entity_id)
            .map(|s| s.state)
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    pub fn is_state(&self, entity_id: &str, state: &Value) -> bool {
        let Some(current) = self.get(entity_id).map(|s| s.state) else {
            return false;
        };
        if let Some(expected) = state.as_str() {
            return current == expected;
        }
        // A list of accepted states
        match state.try_iter() {
            Ok(mut iter) => iter.any(|v| v.as_str() == Some(current.as_str())),
            Err(_) => false,
        }
    }

    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.get(entity_id)
            .and_then(|s| s.attributes.get(attribute).map(Value::from_serialize))
            .unwrap_or(Value::from(()))
    }

    pub fn is_state_attr(&self, entity_id: &str, attribute: &str, value: &Value) -> bool {
        let current = self.state_attr(entity_id, attribute);
        !current.is_none() && &current == value
    }

    /// Entity exists and is neither `unknown` nor `unavailable`
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.get(entity_id).is_some_and(|state| state.has_value())
    }

    fn domain_states(&self, domain: &str) -> Vec<State> {
        self.record_domain(domain);
        self.state_machine.domain_states(domain)
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;

        if key.contains('.') {
            return self.get(key).map(state_to_value);
        }

        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            states: self.clone(),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires entity_id")
        })?;

        Ok(Value::from(self.get_state(entity_id)))
    }
}

/// `states.<domain>` in a template
#[derive(Debug)]
struct DomainProxy {
    domain: String,
    states: Arc<StatesObject>,
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let entity_id = format!("{}.{}", self.domain, key.as_str()?);
        self.states.get(&entity_id).map(state_to_value)
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, _args: &[Value]) -> Result<Value, Error> {
        Ok(Value::from(
            self.states
                .domain_states(&self.domain)
                .into_iter()
                .map(state_to_value)
                .collect::<Vec<_>>(),
        ))
    }
}

fn state_to_value(state: State) -> Value {
    Value::from_object(StateWrapper(state))
}

/// A single entity state seen from a template
#[derive(Debug)]
pub struct StateWrapper(pub State);

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let state = &self.0;
        match key.as_str()? {
            "state" => Some(Value::from(state.state.as_str())),
            "entity_id" => Some(Value::from(state.entity_id.to_string())),
            "domain" => Some(Value::from(state.entity_id.domain())),
            "object_id" => Some(Value::from(state.entity_id.object_id())),
            "name" => Some(
                state
                    .attributes
                    .get("friendly_name")
                    .and_then(|v| v.as_str())
                    .map(Value::from)
                    .unwrap_or_else(|| Value::from(state.entity_id.object_id())),
            ),
            "last_changed" => Some(Value::from(state.last_changed.to_rfc3339())),
            "last_updated" => Some(Value::from(state.last_updated.to_rfc3339())),
            "attributes" => Some(Value::from_object(
                state
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_serialize(v)))
                    .collect::<BTreeMap<String, Value>>(),
            )),
            other => state.attributes.get(other).map(Value::from_serialize),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.state)
    }
}
