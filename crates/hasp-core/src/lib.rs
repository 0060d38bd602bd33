//! Core types for the openHASP bridge
//!
//! This crate provides the value types shared by every other crate in the
//! workspace: Home Assistant side identifiers (`EntityId`, `State`, `Event`,
//! `ServiceCall`), panel side identifiers (`ObjectId`), the MQTT topic namer
//! and the parsers for messages published by the panel.

mod context;
pub mod domains;
mod entity_id;
mod event;
pub mod message;
mod object_id;
mod service_call;
mod state;
pub mod topic;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use object_id::{ObjectId, ObjectIdError};
pub use service_call::{split_service_id, ServiceCall};
pub use state::State;
pub use topic::PlateTopics;

/// Domain under which plates expose their entity and services
pub const DOMAIN: &str = "openhasp";

/// State value of an entity that cannot be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value of an entity whose state has never been reported
pub const STATE_UNKNOWN: &str = "unknown";

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type fired when a plate's LWT goes online
    pub const PLATE_ONLINE: &str = "openhasp_plate_online";

    /// Event type fired when a plate's LWT goes offline
    pub const PLATE_OFFLINE: &str = "openhasp_plate_offline";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for PLATE_ONLINE events
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct PlateOnlineData {
        pub plate: String,
    }

    impl EventData for PlateOnlineData {
        fn event_type() -> &'static str {
            PLATE_ONLINE
        }
    }

    /// Data for PLATE_OFFLINE events
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct PlateOfflineData {
        pub plate: String,
    }

    impl EventData for PlateOfflineData {
        fn event_type() -> &'static str {
            PLATE_OFFLINE
        }
    }
}
