//! openHASP bridge daemon
//!
//! Wires the MQTT client, the Home Assistant REST client and the restore
//! state file around one runner task per configured plate.

pub mod bridge;
pub mod hass;
pub mod mqtt;
pub mod services;
pub mod storage;

pub use bridge::Bridge;
pub use hass::{ingest_statestream, parse_statestream, HaClient, StatestreamUpdate};
pub use mqtt::RumqttPublisher;
pub use services::ServiceDispatcher;
pub use storage::{RestoreStateStore, Storage, StorageError, StorageFile, StorageResult};
