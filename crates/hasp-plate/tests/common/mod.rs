//! Recording doubles and a harness for driving a plate in tests

#![allow(dead_code)]

use async_trait::async_trait;
use hasp_config::{AllowList, PlateConfig};
use hasp_core::events::StateChangedData;
use hasp_core::{Context, EntityId, ServiceCall};
use hasp_event_bus::EventBus;
use hasp_plate::{
    Collaborators, InboundMessage, MqttPublisher, Plate, PlateInput, PlateSnapshot, RestoreStore,
    ServiceCaller, TransportError, TransportResult,
};
use hasp_state_machine::StateMachine;
use hasp_template::TemplateEngine;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const BASE: &str = "hasp/plate1";

/// Every publish, in order
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Messages since the last take
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    /// Payloads published on `<BASE>/<suffix>`
    pub fn payloads(&self, suffix: &str) -> Vec<String> {
        let topic = format!("{BASE}/{suffix}");
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl MqttPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> TransportResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Every service call, in order; selected services fail
#[derive(Default)]
pub struct RecordingCaller {
    calls: Mutex<Vec<ServiceCall>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingCaller {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.calls().iter().map(ServiceCall::service_id).collect()
    }

    pub fn fail(&self, service_id: &str) {
        self.failing.lock().unwrap().insert(service_id.to_string());
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ServiceCaller for RecordingCaller {
    async fn call_service(&self, call: ServiceCall) -> TransportResult<()> {
        let service = call.service_id();
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(&service) {
            return Err(TransportError::Service {
                service,
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, PlateSnapshot>>,
}

impl MemoryStore {
    pub fn get(&self, plate: &str) -> Option<PlateSnapshot> {
        self.snapshots.lock().unwrap().get(plate).copied()
    }

    pub fn put(&self, plate: &str, snapshot: PlateSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(plate.to_string(), snapshot);
    }
}

#[async_trait]
impl RestoreStore for MemoryStore {
    async fn load(&self, plate: &str) -> TransportResult<Option<PlateSnapshot>> {
        Ok(self.get(plate))
    }

    async fn save(&self, plate: &str, snapshot: &PlateSnapshot) -> TransportResult<()> {
        self.put(plate, *snapshot);
        Ok(())
    }
}

pub struct Harness {
    pub publisher: Arc<RecordingPublisher>,
    pub caller: Arc<RecordingCaller>,
    pub store: Arc<MemoryStore>,
    pub states: Arc<StateMachine>,
    pub bus: Arc<EventBus>,
    pub engine: Arc<TemplateEngine>,
    pub allowlist: Vec<PathBuf>,
}

impl Harness {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let engine = Arc::new(TemplateEngine::new(states.clone()));
        Self {
            publisher: Arc::new(RecordingPublisher::default()),
            caller: Arc::new(RecordingCaller::default()),
            store: Arc::new(MemoryStore::default()),
            states,
            bus,
            engine,
            allowlist: Vec::new(),
        }
    }

    pub fn allow(mut self, dir: impl Into<PathBuf>) -> Self {
        self.allowlist.push(dir.into());
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            publisher: self.publisher.clone(),
            services: self.caller.clone(),
            store: self.store.clone(),
            state_machine: self.states.clone(),
            templates: self.engine.clone(),
            event_bus: self.bus.clone(),
            allowlist: AllowList::new(self.allowlist.clone()),
        }
    }

    /// Build `plate1` from the YAML body of its configuration (topic is added)
    pub fn plate(&self, yaml: &str) -> Plate {
        let config = PlateConfig::from_yaml(&format!("topic: {BASE}\n{yaml}")).unwrap();
        config.validate("plate1").unwrap();
        Plate::new("plate1", config, self.collaborators()).unwrap()
    }

    /// Set an entity state, returning the change as the bus would deliver it
    pub fn set_state(&self, entity_id: &str, state: &str) -> StateChangedData {
        let id: EntityId = entity_id.parse().unwrap();
        let old_state = self.states.get(entity_id);
        let new_state = self
            .states
            .set(id.clone(), state, HashMap::new(), Context::new());
        StateChangedData {
            entity_id: id,
            old_state,
            new_state: Some(new_state),
        }
    }
}

/// An MQTT input on `<BASE>/<suffix>`
pub fn mqtt(suffix: &str, payload: &str) -> PlateInput {
    PlateInput::Mqtt(InboundMessage::new(format!("{BASE}/{suffix}"), payload))
}

/// Start the plate and bring it online, then forget what that published
pub async fn online(harness: &Harness, plate: &mut Plate) {
    plate.start().await;
    plate.handle(mqtt("LWT", "online")).await;
    harness.publisher.clear();
    harness.caller.clear();
}
