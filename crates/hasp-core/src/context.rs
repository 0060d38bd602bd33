//! Origin tracking for state writes and service calls

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Who caused a state write or a service call
///
/// The calls a panel press produces share the press's context as their
/// parent, so a log reader can follow one press to every call it made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// A fresh context recording `parent` as its cause
    pub fn caused_by(parent: &Context) -> Self {
        Self::with_parent(Some(parent.id.clone()))
    }

    fn with_parent(parent_id: Option<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
