//! MQTT topic namer
//!
//! Pure string composition from a plate's base topic. The returned strings are
//! used as exact-match keys of each plate's dispatch table, so every topic a
//! plate subscribes to or publishes on must come from here.

use crate::ObjectId;

/// Topics of one plate, derived from its base topic (e.g. `hasp/plate1`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateTopics {
    base: String,
}

impl PlateTopics {
    /// Trailing slashes on the base topic are dropped
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `<base>/LWT`: availability beacon, bare `online` / `offline`
    pub fn lwt(&self) -> String {
        format!("{}/LWT", self.base)
    }

    /// `<base>/state/<name>`
    pub fn state(&self, name: &str) -> String {
        format!("{}/state/{}", self.base, name)
    }

    /// `<base>/state/idle`: bare `off` / `short` / `long`
    pub fn idle_state(&self) -> String {
        self.state("idle")
    }

    /// `<base>/state/page`: bare integer
    pub fn page_state(&self) -> String {
        self.state("page")
    }

    /// `<base>/state/statusupdate`: JSON status blob
    pub fn statusupdate_state(&self) -> String {
        self.state("statusupdate")
    }

    /// `<base>/state/<obj>`
    pub fn object_state(&self, obj: ObjectId) -> String {
        self.state(&obj.to_string())
    }

    /// `<base>/command`: free-text device commands
    pub fn command(&self) -> String {
        format!("{}/command", self.base)
    }

    /// `<base>/command/jsonl`: bulk page-definition upload
    pub fn jsonl_command(&self) -> String {
        format!("{}/command/jsonl", self.base)
    }

    pub fn page_command(&self) -> String {
        format!("{}/command/page", self.base)
    }

    pub fn dim_command(&self) -> String {
        format!("{}/command/dim", self.base)
    }

    pub fn light_command(&self) -> String {
        format!("{}/command/light", self.base)
    }

    /// `<base>/command/<obj>.<property>`
    pub fn object_command(&self, obj: ObjectId, property: &str) -> String {
        format!("{}/command/{}.{}", self.base, obj, property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_topics() {
        let topics = PlateTopics::new("hasp/plate1/");
        assert_eq!(topics.base(), "hasp/plate1");
        assert_eq!(topics.lwt(), "hasp/plate1/LWT");
        assert_eq!(topics.idle_state(), "hasp/plate1/state/idle");
        assert_eq!(topics.page_state(), "hasp/plate1/state/page");
        assert_eq!(topics.statusupdate_state(), "hasp/plate1/state/statusupdate");
        assert_eq!(topics.command(), "hasp/plate1/command");
        assert_eq!(topics.jsonl_command(), "hasp/plate1/command/jsonl");
        assert_eq!(topics.page_command(), "hasp/plate1/command/page");
        assert_eq!(topics.dim_command(), "hasp/plate1/command/dim");
        assert_eq!(topics.light_command(), "hasp/plate1/command/light");
    }

    #[test]
    fn test_object_topics() {
        let topics = PlateTopics::new("hasp/plate1");
        let obj = ObjectId::new(1, 2);
        assert_eq!(topics.object_state(obj), "hasp/plate1/state/p1b2");
        assert_eq!(
            topics.object_command(obj, "val"),
            "hasp/plate1/command/p1b2.val"
        );
        assert_eq!(
            topics.object_command(obj, "text"),
            "hasp/plate1/command/p1b2.text"
        );
    }
}
