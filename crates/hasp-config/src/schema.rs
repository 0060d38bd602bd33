//! Typed bridge configuration
//!
//! The top-level sections are parsed eagerly. Each plate under `openhasp:` is
//! parsed and validated on its own, so one broken plate is reported and
//! skipped without taking the others down.

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use hasp_core::{split_service_id, EntityId, ObjectId, DOMAIN};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Numbers that may arrive as strings after `!env_var` / `!secret` substitution
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient<T> {
        Value(T),
        Text(String),
    }

    match Lenient::<T>::deserialize(deserializer)? {
        Lenient::Value(value) => Ok(value),
        Lenient::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Templates may be written as bare YAML scalars (`text: 5`)
fn scalar_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = IndexMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "property '{key}' must be a template string, got {other:?}"
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port", deserialize_with = "lenient")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive", deserialize_with = "lenient")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "openhasp-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

/// Connection to the Home Assistant instance whose entities the plates show
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    /// Base URL of the REST API; without it service calls are only logged
    #[serde(default)]
    pub url: Option<String>,
    /// Long-lived access token
    #[serde(default)]
    pub token: Option<String>,
    /// Base topic of the `mqtt_statestream` integration
    #[serde(default = "default_statestream_topic")]
    pub statestream_topic: String,
}

fn default_statestream_topic() -> String {
    "homeassistant/statestream".to_string()
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            statestream_topic: default_statestream_topic(),
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub homeassistant: HomeAssistantConfig,
    #[serde(default)]
    pub allowlist_external_dirs: Vec<PathBuf>,
    /// Raw plate sections, keyed by plate slug
    #[serde(default)]
    pub openhasp: IndexMap<String, serde_yaml::Value>,
}

impl BridgeConfig {
    /// Load `file` from `config_dir`, processing `!include`/`!secret`/`!env_var`
    pub fn load(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_value(load_yaml(config_dir, file)?)
    }

    pub fn from_value(value: serde_yaml::Value) -> ConfigResult<Self> {
        section("configuration", value)
    }

    pub fn allowlist(&self) -> AllowList {
        AllowList::new(self.allowlist_external_dirs.clone())
    }

    /// Parse and validate one plate
    pub fn plate(&self, slug: &str) -> ConfigResult<PlateConfig> {
        let raw = self
            .openhasp
            .get(slug)
            .ok_or_else(|| ConfigError::InvalidPlate {
                plate: slug.to_string(),
                reason: "not configured".to_string(),
            })?;
        let plate: PlateConfig = section(&format!("openhasp.{slug}"), raw.clone())?;
        plate.validate(slug)?;
        Ok(plate)
    }

    /// Every configured plate in file order, each parsed independently
    pub fn plates(&self) -> Vec<(String, ConfigResult<PlateConfig>)> {
        self.openhasp
            .keys()
            .map(|slug| (slug.clone(), self.plate(slug)))
            .collect()
    }
}

fn section<T: DeserializeOwned>(name: &str, value: serde_yaml::Value) -> ConfigResult<T> {
    serde_yaml::from_value(value).map_err(|source| ConfigError::Schema {
        section: name.to_string(),
        source,
    })
}

/// Directories files may be read from (`allowlist_external_dirs`)
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    dirs: Vec<PathBuf>,
}

impl AllowList {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Whether `path` resolves inside one of the allowed directories
    ///
    /// Paths are canonicalized first, so `..` and symlinks cannot escape.
    pub fn is_allowed(&self, path: &Path) -> bool {
        let Ok(path) = path.canonicalize() else {
            return false;
        };
        self.dirs
            .iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .any(|dir| path.starts_with(dir))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightnessRange {
    #[serde(deserialize_with = "lenient")]
    pub min: u32,
    #[serde(deserialize_with = "lenient")]
    pub max: u32,
}

impl BrightnessRange {
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for BrightnessRange {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagesConfig {
    #[serde(default)]
    pub prev_obj: Option<ObjectId>,
    #[serde(default)]
    pub home_obj: Option<ObjectId>,
    #[serde(default)]
    pub next_obj: Option<ObjectId>,
    /// JSONL page-definition file sent to the plate when it comes online
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Page bound used until the plate reports its own
    #[serde(default = "default_max_pages", deserialize_with = "lenient")]
    pub max: u32,
}

fn default_max_pages() -> u32 {
    12
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            prev_obj: None,
            home_obj: None,
            next_obj: None,
            path: None,
            max: default_max_pages(),
        }
    }
}

/// One service call of an event mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMapping {
    /// `domain.service`
    pub service: String,
    #[serde(default)]
    pub data: Map<String, JsonValue>,
    #[serde(default)]
    pub target: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub obj: ObjectId,
    /// Entity mirrored onto the object's `val`
    #[serde(default)]
    pub track: Option<EntityId>,
    /// Property name -> template
    #[serde(default, deserialize_with = "scalar_map")]
    pub properties: IndexMap<String, String>,
    /// Event name -> service calls, in configured order
    #[serde(default)]
    pub event: IndexMap<String, Vec<ServiceMapping>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateConfig {
    pub topic: String,
    #[serde(default)]
    pub hwid: Option<String>,
    #[serde(default = "default_idle_brightness", deserialize_with = "lenient")]
    pub idle_brightness: u32,
    #[serde(default = "default_awake_brightness", deserialize_with = "lenient")]
    pub awake_brightness: u32,
    #[serde(default)]
    pub brightness_range: BrightnessRange,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

fn default_idle_brightness() -> u32 {
    10
}

fn default_awake_brightness() -> u32 {
    100
}

impl PlateConfig {
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let value = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Schema {
            section: "plate".to_string(),
            source,
        })?;
        section("plate", value)
    }

    /// Hardware id, the slug unless configured
    pub fn hwid<'a>(&'a self, slug: &'a str) -> &'a str {
        self.hwid.as_deref().unwrap_or(slug)
    }

    /// Checks that serde cannot express
    pub fn validate(&self, slug: &str) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::InvalidPlate {
            plate: slug.to_string(),
            reason,
        };

        EntityId::new(DOMAIN, slug)
            .map_err(|e| invalid(format!("name is not usable as an entity id: {e}")))?;

        if self.topic.trim_end_matches('/').is_empty() {
            return Err(invalid("topic must not be empty".to_string()));
        }
        if self.topic.contains(['+', '#']) {
            return Err(invalid(format!(
                "topic '{}' must not contain wildcards",
                self.topic
            )));
        }

        let range = self.brightness_range;
        if range.min > range.max {
            return Err(invalid(format!(
                "brightness_range min {} is above max {}",
                range.min, range.max
            )));
        }
        for (name, value) in [
            ("idle_brightness", self.idle_brightness),
            ("awake_brightness", self.awake_brightness),
        ] {
            if !range.contains(value) {
                return Err(invalid(format!(
                    "{name} {value} is outside {}..={}",
                    range.min, range.max
                )));
            }
        }

        if self.pages.max == 0 {
            return Err(invalid("pages.max must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for object in &self.objects {
            if !seen.insert(object.obj) {
                return Err(invalid(format!("object {} is configured twice", object.obj)));
            }
            object.validate().map_err(invalid)?;
        }

        Ok(())
    }
}

impl ObjectConfig {
    fn validate(&self) -> Result<(), String> {
        if self.track.is_some() && self.properties.contains_key("val") {
            return Err(format!(
                "object {} both tracks an entity and templates 'val'",
                self.obj
            ));
        }

        for (property, template) in &self.properties {
            if property.is_empty() || property.contains(['/', '.', '+', '#']) {
                return Err(format!("object {}: invalid property '{property}'", self.obj));
            }
            if template.trim().is_empty() {
                return Err(format!("object {}: empty template for '{property}'", self.obj));
            }
        }

        for (event, calls) in &self.event {
            if event.trim().is_empty() {
                return Err(format!("object {}: empty event name", self.obj));
            }
            for call in calls {
                if split_service_id(&call.service).is_none() {
                    return Err(format!(
                        "object {}: '{}' is not a domain.service name",
                        self.obj, call.service
                    ));
                }
            }
        }

        Ok(())
    }
}
