//! Configuration for the openHASP bridge
//!
//! YAML files are loaded with Home Assistant's custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! The processed document is deserialized into [`BridgeConfig`]; each plate
//! section is then parsed and validated on its own with
//! [`BridgeConfig::plate`].
//!
//! ```ignore
//! let config = BridgeConfig::load("/config", "configuration.yaml")?;
//! for (slug, plate) in config.plates() {
//!     let plate = plate?;
//! }
//! ```

mod error;
mod loader;
mod schema;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use schema::{
    AllowList, BridgeConfig, BrightnessRange, HomeAssistantConfig, MqttConfig, ObjectConfig,
    PagesConfig, PlateConfig, ServiceMapping,
};
pub use secrets::Secrets;
