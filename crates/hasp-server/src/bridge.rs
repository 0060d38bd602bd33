//! Bridge assembly and the per-plate runner tasks
//!
//! Every plate runs in its own task that owns the [`Plate`] outright and
//! takes inputs from two sources: its MQTT/command queue and the bus's
//! state changes. One task per plate keeps handling sequential without a
//! lock, and a slow plate never holds up another.

use crate::hass::{ingest_statestream, HaClient};
use crate::services::ServiceDispatcher;
use hasp_config::BridgeConfig;
use hasp_core::events::StateChangedData;
use hasp_core::{ServiceCall, DOMAIN};
use hasp_event_bus::{EventBus, TypedEventReceiver};
use hasp_plate::{
    Collaborators, InboundMessage, MqttPublisher, Plate, PlateInput, RestoreStore, ServiceCaller,
    TransportResult,
};
use hasp_state_machine::StateMachine;
use hasp_template::TemplateEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Inputs a plate may have queued before inbound messages are dropped
const PLATE_QUEUE: usize = 1024;

struct PlateHandle {
    name: String,
    sender: mpsc::Sender<PlateInput>,
    task: JoinHandle<()>,
}

pub struct Bridge {
    bus: Arc<EventBus>,
    states: Arc<StateMachine>,
    services: Arc<ServiceDispatcher>,
    /// Exact MQTT topic to the plate that subscribed it
    topics: HashMap<String, mpsc::Sender<PlateInput>>,
    statestream_prefix: String,
    plates: Vec<PlateHandle>,
}

impl Bridge {
    /// Build every valid plate and spawn its runner
    ///
    /// Plates whose configuration fails validation are logged and skipped.
    pub fn start(
        config: &BridgeConfig,
        publisher: Arc<dyn MqttPublisher>,
        store: Arc<dyn RestoreStore>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let templates = Arc::new(TemplateEngine::new(states.clone()));
        let allowlist = config.allowlist();

        let mut queued = Vec::new();
        for (name, result) in config.plates() {
            match result {
                Ok(plate_config) => {
                    let (sender, receiver) = mpsc::channel(PLATE_QUEUE);
                    queued.push((name, plate_config, sender, receiver));
                }
                Err(err) => error!(plate = %name, %err, "Invalid plate configuration, skipping"),
            }
        }

        let mut dispatcher = ServiceDispatcher::new(home_assistant(config));
        for (name, _, sender, _) in &queued {
            dispatcher.register_plate(format!("{DOMAIN}.{name}"), sender);
        }
        let services = Arc::new(dispatcher);

        let mut topics = HashMap::new();
        let mut plates = Vec::new();
        for (name, plate_config, sender, receiver) in queued {
            let collab = Collaborators {
                publisher: publisher.clone(),
                services: services.clone(),
                store: store.clone(),
                state_machine: states.clone(),
                templates: templates.clone(),
                event_bus: bus.clone(),
                allowlist: allowlist.clone(),
            };
            let plate = match Plate::new(name.clone(), plate_config, collab) {
                Ok(plate) => plate,
                Err(err) => {
                    error!(plate = %name, %err, "Cannot build plate, skipping");
                    continue;
                }
            };

            for topic in plate.subscriptions() {
                if topics.insert(topic.clone(), sender.clone()).is_some() {
                    warn!(plate = %name, %topic, "Topic already used by another plate");
                }
            }

            // Subscribed before the task starts so no change is missed
            let state_changes = bus.subscribe_typed::<StateChangedData>();
            let task = tokio::spawn(run_plate(plate, receiver, state_changes));
            plates.push(PlateHandle { name, sender, task });
        }

        info!(plates = plates.len(), "Bridge started");

        Self {
            bus,
            states,
            services,
            topics,
            statestream_prefix: format!("{}/", config.homeassistant.statestream_topic),
            plates,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn states(&self) -> &Arc<StateMachine> {
        &self.states
    }

    pub fn plate_names(&self) -> Vec<&str> {
        self.plates.iter().map(|p| p.name.as_str()).collect()
    }

    /// Every topic the MQTT client must subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics.push(format!("{}#", self.statestream_prefix));
        topics
    }

    /// Route one inbound MQTT message
    ///
    /// Never waits: the MQTT event loop calling this is also what drains the
    /// plates' outgoing publishes.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        if topic.starts_with(&self.statestream_prefix) {
            let prefix = self.statestream_prefix.trim_end_matches('/');
            ingest_statestream(&self.states, prefix, topic, payload);
            return;
        }

        let Some(sender) = self.topics.get(topic) else {
            trace!(%topic, "No plate for topic");
            return;
        };
        let message = InboundMessage::new(topic, payload.to_vec());
        offer(sender, topic, PlateInput::Mqtt(message));
    }

    /// Call a service as a plate would
    pub async fn call_service(&self, call: ServiceCall) -> TransportResult<()> {
        self.services.call_service(call).await
    }

    /// Close every plate queue and wait for the runners to drain
    pub async fn shutdown(self) {
        drop(self.topics);
        for handle in self.plates {
            drop(handle.sender);
            if let Err(err) = handle.task.await {
                error!(plate = %handle.name, %err, "Plate runner panicked");
            }
        }
        info!("Bridge stopped");
    }
}

/// Queue `input` for a plate runner, dropping it when the queue is full
fn offer(sender: &mpsc::Sender<PlateInput>, topic: &str, input: PlateInput) -> bool {
    match sender.try_send(input) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%topic, "Plate queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!(%topic, "Plate runner stopped, dropping message");
            false
        }
    }
}

fn home_assistant(config: &BridgeConfig) -> Option<HaClient> {
    let ha = &config.homeassistant;
    match (&ha.url, &ha.token) {
        (Some(url), Some(token)) => match HaClient::new(url, token) {
            Ok(client) => Some(client),
            Err(err) => {
                error!(%err, "Cannot create Home Assistant client");
                None
            }
        },
        _ => {
            warn!("homeassistant.url/token not set, service calls outside openhasp will fail");
            None
        }
    }
}

#[instrument(skip_all, fields(plate = %plate.name()))]
async fn run_plate(
    mut plate: Plate,
    mut inputs: mpsc::Receiver<PlateInput>,
    mut state_changes: TypedEventReceiver<StateChangedData>,
) {
    plate.start().await;

    loop {
        tokio::select! {
            input = inputs.recv() => match input {
                Some(input) => plate.handle(input).await,
                None => break,
            },
            event = state_changes.recv() => match event {
                Ok(event) => plate.handle(PlateInput::StateChanged(event.data)).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Plate fell behind on state changes");
                }
                Err(RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            },
        }
    }

    info!("Plate stopped");
}
