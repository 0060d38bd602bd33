//! The seams between a plate and the outside world
//!
//! The plate never touches a socket or a file it was not asked to load. It
//! publishes through [`MqttPublisher`], calls services through
//! [`ServiceCaller`] and persists its page and dim level through
//! [`RestoreStore`]. The server provides the real implementations; tests
//! provide recording doubles.

use crate::error::TransportResult;
use async_trait::async_trait;
use hasp_core::ServiceCall;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait MqttPublisher: Send + Sync {
    /// Publish `payload` on `topic`, not retained
    async fn publish(&self, topic: &str, payload: String) -> TransportResult<()>;
}

#[async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call_service(&self, call: ServiceCall) -> TransportResult<()>;
}

#[async_trait]
pub trait RestoreStore: Send + Sync {
    /// Last snapshot saved for `plate`, `None` on first run
    async fn load(&self, plate: &str) -> TransportResult<Option<PlateSnapshot>>;

    async fn save(&self, plate: &str, snapshot: &PlateSnapshot) -> TransportResult<()>;
}

/// What a plate remembers across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateSnapshot {
    pub page: u32,
    pub dim: u32,
    pub backlight: bool,
}

/// A message received on one of the plate's subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
