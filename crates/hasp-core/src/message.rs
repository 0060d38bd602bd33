//! Messages published by the panel
//!
//! Every parser here is strict about shape and lenient about content: a
//! payload that is not what the topic promises is an error for the caller to
//! log, while unknown event names or extra JSON keys are carried through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Result type for message parsing
pub type MessageResult<T> = Result<T, MessageError>;

/// Errors raised while parsing panel payloads
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("field '{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("'{0}' is not an idle state (off, short, long)")]
    InvalidIdle(String),

    #[error("'{0}' is not an LWT payload (online, offline)")]
    InvalidLwt(String),

    #[error("'{0}' is not a page number")]
    InvalidPage(String),
}

fn as_text(payload: &[u8]) -> MessageResult<&str> {
    std::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|_| MessageError::InvalidUtf8)
}

/// Value of the `event` field of an object state message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaspEvent {
    On,
    Off,
    Down,
    Up,
    Short,
    Long,
    Hold,
    Release,
    Changed,
    /// Anything the firmware sends that is not in the list above
    Unknown(String),
}

impl HaspEvent {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "on" => Self::On,
            "off" => Self::Off,
            "down" => Self::Down,
            "up" => Self::Up,
            "short" => Self::Short,
            "long" => Self::Long,
            "hold" => Self::Hold,
            "release" => Self::Release,
            "changed" => Self::Changed,
            _ => Self::Unknown(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Down => "down",
            Self::Up => "up",
            Self::Short => "short",
            Self::Long => "long",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Changed => "changed",
            Self::Unknown(value) => value,
        }
    }

    /// Case-insensitive equality with a configured event key.
    /// Unknown events never match.
    pub fn matches(&self, key: &str) -> bool {
        !matches!(self, Self::Unknown(_)) && self.as_str().eq_ignore_ascii_case(key)
    }

    /// A press-and-hold gesture starts
    pub fn is_press(&self) -> bool {
        matches!(self, Self::Down)
    }

    /// A press-and-hold gesture ends
    pub fn is_release(&self) -> bool {
        matches!(self, Self::Up | Self::Release)
    }
}

impl fmt::Display for HaspEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON payload of `<base>/state/<obj>`
///
/// Buttons send `{"event": "down"}`, boolean widgets `{"val": 1}` (often
/// together with an event), data widgets arbitrary keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMessage {
    pub event: Option<HaspEvent>,
    pub val: Option<i64>,
    /// The whole payload, used as template variables for service calls
    pub fields: Map<String, Value>,
}

impl ObjectMessage {
    pub fn parse(payload: &[u8]) -> MessageResult<Self> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(fields) = value else {
            return Err(MessageError::NotAnObject);
        };

        let event = match fields.get("event") {
            None => None,
            Some(Value::String(s)) => Some(HaspEvent::parse(s)),
            Some(other) => {
                return Err(MessageError::InvalidField {
                    field: "event",
                    reason: format!("must be a string, got {other}"),
                })
            }
        };

        let val = match fields.get("val") {
            None => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| MessageError::InvalidField {
                field: "val",
                reason: format!("must be an integer, got {v}"),
            })?),
        };

        Ok(Self { event, val, fields })
    }

    /// Keys of the payload, the set frozen during a press
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// `val` restricted to the boolean range used by toggles
    pub fn boolean_val(&self) -> MessageResult<Option<bool>> {
        match self.val {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(other) => Err(MessageError::InvalidField {
                field: "val",
                reason: format!("must be 0 or 1 for a tracked toggle, got {other}"),
            }),
        }
    }
}

/// Panel inactivity level from `<base>/state/idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Off,
    Short,
    Long,
}

impl IdleState {
    pub fn parse(payload: &[u8]) -> MessageResult<Self> {
        let text = as_text(payload)?;
        match text.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "short" => Ok(Self::Short),
            "long" => Ok(Self::Long),
            _ => Err(MessageError::InvalidIdle(text.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Short => "short",
            Self::Long => "long",
        }
    }
}

/// Last Will and Testament payload from `<base>/LWT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lwt {
    Online,
    Offline,
}

impl Lwt {
    pub fn parse(payload: &[u8]) -> MessageResult<Self> {
        match as_text(payload)? {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(MessageError::InvalidLwt(other.to_string())),
        }
    }
}

/// Bare integer payload of `<base>/state/page`
pub fn parse_page(payload: &[u8]) -> MessageResult<u32> {
    let text = as_text(payload)?;
    text.parse()
        .map_err(|_| MessageError::InvalidPage(text.to_string()))
}

/// JSON payload of `<base>/state/statusupdate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub node: String,
    pub version: String,
    pub uptime: u64,
    #[serde(rename = "canUpdate")]
    pub can_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, alias = "numPages", skip_serializing_if = "Option::is_none")]
    pub num_pages: Option<u32>,
    /// Everything else the firmware reports (ip, heap, ssid, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusUpdate {
    pub fn parse(payload: &[u8]) -> MessageResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// `(major, minor)` of the firmware version string, e.g. `0.6.3` -> `(0, 6)`
    pub fn firmware_line(&self) -> Option<(u32, u32)> {
        let mut parts = self.version.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts.next()?.trim().parse().ok()?;
        Some((major, minor))
    }
}
