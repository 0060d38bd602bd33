//! Plate state synchronization
//!
//! Keeps one openHASP panel and Home Assistant in step over MQTT:
//!
//! - [`availability`] follows the panel's LWT and decides when a refresh is due
//! - [`object`] mirrors entity states and templates onto widget properties,
//!   suppressing echoes and respecting the press freeze
//! - [`router`] turns panel events into service calls
//! - [`navigator`] owns the page and the idle/backlight levels
//! - [`Plate`] wires them to the topics it subscribes to
//!
//! All I/O goes through the traits in [`transport`].

pub mod availability;
pub mod command;
mod error;
pub mod navigator;
pub mod object;
mod plate;
pub mod router;
pub mod transport;

pub use availability::{Availability, AvailabilityTracker, Transition};
pub use command::PlateCommand;
pub use error::{PlateError, PlateResult, TransportError, TransportResult};
pub use navigator::{IdleDim, NavButton, PageNavigator, HOME_PAGE};
pub use object::{ObjectMirror, PropertyUpdate, ToggleRequest};
pub use plate::{Collaborators, Plate, PlateInput, SUPPORTED_FIRMWARE};
pub use router::EventRouter;
pub use transport::{InboundMessage, MqttPublisher, PlateSnapshot, RestoreStore, ServiceCaller};
