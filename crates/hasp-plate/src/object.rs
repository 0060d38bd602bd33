//! Object mirror: one widget's view of Home Assistant
//!
//! An object mirrors a tracked entity onto its `val` property and any number
//! of templates onto other properties. Every value it decides to send is
//! cached first, so a refresh can replay the cache without re-rendering and
//! an echo of an already cached value is never sent twice.
//!
//! A press (`down`) freezes the keys of that event payload until the matching
//! `up`/`release`. Frozen properties keep updating the cache but are not
//! published, which stops a service call triggered by the press from echoing
//! back onto the widget the finger is still on.

use crate::error::{PlateError, PlateResult};
use hasp_config::{ObjectConfig, ServiceMapping};
use hasp_core::domains::{coerce_state, supports_toggle_return, toggle_state};
use hasp_core::message::ObjectMessage;
use hasp_core::{EntityId, ObjectId, State};
use hasp_state_machine::StateMachine;
use hasp_template::{Dependencies, TemplateEngine};
use indexmap::IndexMap;
use serde_json::Map;
use std::collections::HashSet;
use tracing::{debug, error, trace, warn};

/// Property a tracked entity is mirrored onto
pub const VAL: &str = "val";

/// A value to publish on `<base>/command/<obj>.<property>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyUpdate {
    pub property: String,
    pub value: String,
}

/// The panel asked for a tracked entity to be switched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRequest {
    pub entity_id: EntityId,
    pub on: bool,
}

impl ToggleRequest {
    pub fn target_state(&self) -> &'static str {
        toggle_state(self.on)
    }

    pub fn service(&self) -> &'static str {
        if self.on {
            "turn_on"
        } else {
            "turn_off"
        }
    }
}

#[derive(Debug)]
struct TemplateProperty {
    template: String,
    /// What the last successful render read; empty until the first render
    dependencies: Dependencies,
}

#[derive(Debug)]
pub struct ObjectMirror {
    id: ObjectId,
    tracked: Option<EntityId>,
    templates: IndexMap<String, TemplateProperty>,
    events: IndexMap<String, Vec<ServiceMapping>>,
    cache: IndexMap<String, String>,
    frozen: HashSet<String>,
}

impl ObjectMirror {
    /// Build the mirror, rejecting templates that do not compile
    pub fn new(config: ObjectConfig, engine: &TemplateEngine) -> PlateResult<Self> {
        let mut templates = IndexMap::new();
        for (property, template) in config.properties {
            engine
                .validate(&template)
                .map_err(|source| PlateError::InvalidTemplate {
                    object: config.obj,
                    property: property.clone(),
                    source,
                })?;
            templates.insert(
                property,
                TemplateProperty {
                    template,
                    dependencies: Dependencies::default(),
                },
            );
        }

        Ok(Self {
            id: config.obj,
            tracked: config.track,
            templates,
            events: config.event,
            cache: IndexMap::new(),
            frozen: HashSet::new(),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn tracked(&self) -> Option<&EntityId> {
        self.tracked.as_ref()
    }

    pub fn events(&self) -> &IndexMap<String, Vec<ServiceMapping>> {
        &self.events
    }

    /// Last value sent (or due to be sent) for a property
    pub fn cached(&self, property: &str) -> Option<&str> {
        self.cache.get(property).map(String::as_str)
    }

    pub fn is_frozen(&self, property: &str) -> bool {
        self.frozen.contains(property)
    }

    /// Render every template and read the tracked entity, for plate start-up
    pub fn sync_all(
        &mut self,
        engine: &TemplateEngine,
        states: &StateMachine,
    ) -> Vec<PropertyUpdate> {
        let mut updates = Vec::new();

        if let Some(state) = self
            .tracked
            .as_ref()
            .and_then(|entity_id| states.get(&entity_id.to_string()))
        {
            updates.extend(self.mirror_state(&state));
        }

        let properties: Vec<String> = self.templates.keys().cloned().collect();
        for property in properties {
            updates.extend(self.render(&property, engine, None));
        }

        updates
    }

    /// React to an entity state change
    pub fn on_state_changed(
        &mut self,
        entity_id: &str,
        new_state: Option<&State>,
        engine: &TemplateEngine,
    ) -> Vec<PropertyUpdate> {
        let mut updates = Vec::new();

        let is_tracked = self
            .tracked
            .as_ref()
            .is_some_and(|tracked| tracked.to_string() == entity_id);
        if let (true, Some(state)) = (is_tracked, new_state) {
            updates.extend(self.mirror_state(state));
        }

        let affected: Vec<String> = self
            .templates
            .iter()
            .filter(|(_, t)| t.dependencies.matches(entity_id))
            .map(|(property, _)| property.clone())
            .collect();
        for property in affected {
            updates.extend(self.render(&property, engine, Some(entity_id)));
        }

        updates
    }

    fn mirror_state(&mut self, state: &State) -> Option<PropertyUpdate> {
        if !state.has_value() {
            debug!(object = %self.id, entity_id = %state.entity_id, state = %state.state, "Not mirroring state");
            return None;
        }
        self.store(VAL, coerce_state(&state.state))
    }

    fn render(
        &mut self,
        property: &str,
        engine: &TemplateEngine,
        trigger: Option<&str>,
    ) -> Option<PropertyUpdate> {
        let entry = self.templates.get_mut(property)?;

        let (rendered, dependencies) = engine.render_watched(&entry.template, &Map::new());
        entry.dependencies = dependencies;

        let value = match rendered {
            Ok(value) => value,
            Err(err) => {
                error!(
                    object = %self.id,
                    property,
                    template = %entry.template,
                    entity_id = trigger.unwrap_or("-"),
                    %err,
                    "Template evaluation failed"
                );
                return None;
            }
        };
        if value.eq_ignore_ascii_case("none") {
            error!(
                object = %self.id,
                property,
                template = %entry.template,
                entity_id = trigger.unwrap_or("-"),
                "Template rendered None, keeping previous value"
            );
            return None;
        }

        self.store(property, value)
    }

    /// Cache a value; returns the update to publish unless it is a repeat or frozen
    fn store(&mut self, property: &str, value: String) -> Option<PropertyUpdate> {
        if self.cache.get(property) == Some(&value) {
            trace!(object = %self.id, property, "Value unchanged");
            return None;
        }
        self.cache.insert(property.to_string(), value.clone());

        if self.frozen.contains(property) {
            debug!(object = %self.id, property, "Property frozen, not publishing");
            return None;
        }

        Some(PropertyUpdate {
            property: property.to_string(),
            value,
        })
    }

    /// Apply a message from `<base>/state/<obj>`
    ///
    /// Updates the freeze set and, for toggle-capable tracked entities, turns
    /// a reported `val` into a switch request. The caller decides whether the
    /// request is needed given the entity's current state.
    pub fn apply_message(&mut self, message: &ObjectMessage) -> Option<ToggleRequest> {
        if let Some(event) = &message.event {
            if event.is_press() {
                self.frozen = message.keys().map(String::from).collect();
            } else if event.is_release() {
                self.frozen.clear();
            }
        }

        let entity_id = self.tracked.clone()?;
        if !supports_toggle_return(&entity_id) {
            return None;
        }

        match message.boolean_val() {
            Ok(Some(on)) => {
                // What the panel shows now; an HA echo of the same value is not resent
                self.cache
                    .insert(VAL.to_string(), coerce_state(toggle_state(on)));
                Some(ToggleRequest { entity_id, on })
            }
            Ok(None) => None,
            Err(err) => {
                warn!(object = %self.id, %err, "Ignoring value from panel");
                None
            }
        }
    }

    /// Cached values for a refresh, without re-rendering
    pub fn cached_updates(&self) -> Vec<PropertyUpdate> {
        self.cache
            .iter()
            .map(|(property, value)| PropertyUpdate {
                property: property.clone(),
                value: value.clone(),
            })
            .collect()
    }
}
