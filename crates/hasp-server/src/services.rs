//! Service dispatch: `openhasp.*` to local plates, the rest to Home Assistant

use crate::hass::HaClient;
use async_trait::async_trait;
use hasp_core::{ServiceCall, DOMAIN};
use hasp_plate::{PlateCommand, PlateInput, ServiceCaller, TransportError, TransportResult};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub struct ServiceDispatcher {
    /// Plate entity id to its runner's queue
    ///
    /// Weak, so a plate holding the dispatcher does not keep its own queue open.
    plates: HashMap<String, mpsc::WeakSender<PlateInput>>,
    hass: Option<HaClient>,
}

impl ServiceDispatcher {
    pub fn new(hass: Option<HaClient>) -> Self {
        Self {
            plates: HashMap::new(),
            hass,
        }
    }

    pub fn register_plate(&mut self, entity_id: impl Into<String>, sender: &mpsc::Sender<PlateInput>) {
        self.plates.insert(entity_id.into(), sender.downgrade());
    }

    fn call_plates(&self, call: &ServiceCall) -> TransportResult<()> {
        let failed = |message: String| TransportError::Service {
            service: call.service_id(),
            message,
        };

        let command =
            PlateCommand::from_service_call(call).map_err(|err| failed(err.to_string()))?;

        let targets = call.entity_ids();
        if targets.is_empty() {
            return Err(failed("no target plate".to_string()));
        }

        for entity_id in targets {
            let sender = self
                .plates
                .get(&entity_id)
                .and_then(mpsc::WeakSender::upgrade)
                .ok_or_else(|| failed(format!("{entity_id} is not a running plate")))?;

            // A plate may call its own services from an event mapping; never wait on its queue
            match sender.try_send(PlateInput::Command(command.clone())) {
                Ok(()) => debug!(%entity_id, ?command, "Queued plate command"),
                Err(TrySendError::Full(_)) => {
                    return Err(failed(format!("{entity_id} queue is full")))
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(failed(format!("{entity_id} is stopped")))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceCaller for ServiceDispatcher {
    async fn call_service(&self, call: ServiceCall) -> TransportResult<()> {
        if call.domain == DOMAIN {
            return self.call_plates(&call);
        }

        match &self.hass {
            Some(hass) => hass.call_service(&call).await,
            None => {
                warn!(service = %call.service_id(), "No Home Assistant configured, dropping service call");
                Err(TransportError::Service {
                    service: call.service_id(),
                    message: "homeassistant.url and token are not configured".to_string(),
                })
            }
        }
    }
}
