//! Entity state store for the bridge
//!
//! Holds the last known state of every Home Assistant entity the bridge has
//! heard about, plus the `openhasp.<plate>` entities the plates publish.
//! A `state_changed` event is fired only when a write actually changes the
//! state value or its attributes, so subscribers never see no-op updates.

use dashmap::DashMap;
use hasp_core::events::StateChangedData;
use hasp_core::{Context, EntityId, State, STATE_UNKNOWN};
use hasp_event_bus::EventBus;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// Returns the stored state. STATE_CHANGED is fired only when the state
    /// value or the attributes differ from what was stored before.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        if old_state.as_ref() == Some(&new_state) {
            trace!("State unchanged");
            return new_state;
        }

        debug!(state = %new_state.state, "Setting entity state");
        self.states.insert(key.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Set only the state value, keeping the current attributes
    pub fn set_state(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        context: Context,
    ) -> State {
        let attributes = self
            .states
            .get(&entity_id.to_string())
            .map(|s| s.attributes.clone())
            .unwrap_or_default();
        self.set(entity_id, state, attributes, context)
    }

    /// Merge one attribute into an entity's state
    ///
    /// An entity first seen through an attribute gets the `unknown` state.
    pub fn set_attribute(
        &self,
        entity_id: EntityId,
        name: impl Into<String>,
        value: Value,
        context: Context,
    ) -> State {
        let (state, mut attributes) = self
            .states
            .get(&entity_id.to_string())
            .map(|s| (s.state.clone(), s.attributes.clone()))
            .unwrap_or_else(|| (STATE_UNKNOWN.to_string(), HashMap::new()));
        attributes.insert(name.into(), value);
        self.set(entity_id, state, attributes, context)
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Remove an entity, firing STATE_CHANGED with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let old_state = self.states.remove(&key).map(|(_, s)| s)?;

        if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
            ids.retain(|id| id != &key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            context,
        );

        Some(old_state)
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateMachine
pub type SharedStateMachine = Arc<StateMachine>;
