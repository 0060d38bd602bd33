//! Services a plate exposes under the `openhasp` domain

use crate::error::{PlateError, PlateResult};
use hasp_core::ServiceCall;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateCommand {
    Wakeup,
    NextPage,
    PrevPage,
    ChangePage(u32),
    LoadPages(PathBuf),
    /// `None` clears every page and goes home
    ClearPage(Option<u32>),
    Refresh,
    Backlight { on: bool, brightness: Option<u32> },
}

impl PlateCommand {
    /// Service names, for registration
    pub const SERVICES: &'static [&'static str] = &[
        "wakeup",
        "next_page",
        "prev_page",
        "change_page",
        "load_pages",
        "clear_page",
        "refresh",
        "backlight",
    ];

    pub fn from_service_call(call: &ServiceCall) -> PlateResult<Self> {
        let invalid = |reason: &str| PlateError::InvalidCommand {
            service: call.service_id(),
            reason: reason.to_string(),
        };

        let command = match call.service.as_str() {
            "wakeup" => Self::Wakeup,
            "next_page" => Self::NextPage,
            "prev_page" => Self::PrevPage,
            "refresh" => Self::Refresh,
            "change_page" => Self::ChangePage(
                uint_field(call.service_data.get("page"))
                    .ok_or_else(|| invalid("`page` must be a positive integer"))?,
            ),
            "clear_page" => match call.service_data.get("page") {
                None | Some(Value::Null) => Self::ClearPage(None),
                page => Self::ClearPage(Some(
                    uint_field(page).ok_or_else(|| invalid("`page` must be a positive integer"))?,
                )),
            },
            "load_pages" => Self::LoadPages(
                call.get::<PathBuf>("path")
                    .ok_or_else(|| invalid("`path` is required"))?,
            ),
            "backlight" => Self::Backlight {
                on: switch_field(call.service_data.get("state"))
                    .ok_or_else(|| invalid("`state` must be on/off or a boolean"))?,
                brightness: match call.service_data.get("brightness") {
                    None | Some(Value::Null) => None,
                    brightness => Some(
                        uint_field(brightness)
                            .ok_or_else(|| invalid("`brightness` must be an integer"))?,
                    ),
                },
            },
            _ => return Err(invalid("unknown service")),
        };

        Ok(command)
    }
}

/// Integer fields arrive as numbers or as rendered template strings
fn uint_field(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn switch_field(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
