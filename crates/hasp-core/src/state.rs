//! Entity state as the bridge sees it

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// One entity's state value and attributes
///
/// Equality ignores timestamps and context: two states are equal when a
/// panel would show the same thing for both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: EntityId,
    /// Raw value, e.g. `on`, `23.5` or `armed_home`
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Last time `state` itself changed
    pub last_changed: DateTime<Utc>,
    /// Last write of either `state` or an attribute
    pub last_updated: DateTime<Utc>,
    pub context: Context,
}

impl State {
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// The successor of this state after a write
    ///
    /// `last_changed` moves only when the value does.
    pub fn with_update(
        &self,
        state: impl Into<String>,
        attributes: HashMap<String, Value>,
        context: Context,
    ) -> Self {
        let mut next = Self::new(self.entity_id.clone(), state, attributes, context);
        if next.state == self.state {
            next.last_changed = self.last_changed;
        }
        next
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Whether the value means anything to a panel
    pub fn has_value(&self) -> bool {
        !self.is_unavailable() && !self.is_unknown()
    }

    /// Attribute `key` decoded as `T`, if present and of that shape
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.attributes.get(key)?;
        T::deserialize(value).ok()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lamp(state: &str) -> State {
        State::new(
            "switch.lamp".parse().unwrap(),
            state,
            HashMap::new(),
            Context::new(),
        )
    }

    #[test]
    fn test_last_changed_moves_with_value_only() {
        let on = lamp("on");
        let same = on.with_update("on", HashMap::from([("x".into(), json!(1))]), Context::new());
        assert_eq!(same.last_changed, on.last_changed);

        let off = on.with_update("off", HashMap::new(), Context::new());
        assert!(off.last_changed >= on.last_changed);
        assert_eq!(off.state, "off");
    }

    #[test]
    fn test_placeholder_states_have_no_value() {
        assert!(lamp("on").has_value());
        assert!(!lamp("unavailable").has_value());
        assert!(!lamp("unknown").has_value());
    }

    #[test]
    fn test_equality_ignores_context() {
        assert_eq!(lamp("on"), lamp("on"));
        assert_ne!(lamp("on"), lamp("off"));
    }
}
