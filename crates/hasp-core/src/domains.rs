//! Domain metadata and state coercion
//!
//! Panel widgets only understand numbers for their `val` property, so entity
//! states are coerced before they are mirrored onto a widget.

use crate::EntityId;

/// Domains whose tracked widgets report presses back as `{"val": 0|1}` and
/// are driven with `turn_on` / `turn_off`
pub static TOGGLE_DOMAINS: &[&str] = &["switch", "light", "media_player"];

/// Toggle states, indexed by their panel value
pub static TOGGLE_STATES: &[&str] = &["off", "on"];

/// Alarm panel states in escalation order
pub static ALARM_STATES: &[&str] = &[
    "disarmed",
    "disarming",
    "arming",
    "pending",
    "triggered",
    "armed_home",
    "armed_away",
    "armed_night",
    "armed_vacation",
    "armed_custom_bypass",
];

/// Index in [`ALARM_STATES`] from which the panel shows "armed"
const ALARM_ARMED_FROM: usize = 5;

/// Whether presses on a widget tracking this entity turn it on and off
pub fn supports_toggle_return(entity_id: &EntityId) -> bool {
    entity_id.in_domains(TOGGLE_DOMAINS)
}

/// Coerce an entity state into the value published to a widget's `val`
///
/// `off`/`on` become `0`/`1`, alarm panel states become `0` until armed and
/// `1` from then on. Anything else (numbers, text) passes through verbatim.
pub fn coerce_state(state: &str) -> String {
    if let Some(index) = TOGGLE_STATES.iter().position(|s| *s == state) {
        return index.to_string();
    }
    if let Some(index) = ALARM_STATES.iter().position(|s| *s == state) {
        return if index >= ALARM_ARMED_FROM { "1" } else { "0" }.to_string();
    }
    state.to_string()
}

/// State name a toggle entity should be in for a panel value
pub fn toggle_state(on: bool) -> &'static str {
    TOGGLE_STATES[usize::from(on)]
}
