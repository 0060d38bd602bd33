//! Availability driven by the plate's LWT topic

use hasp_core::message::Lwt;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// No LWT seen yet
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Outcome of feeding one LWT payload to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The plate came (back) online; exactly one refresh is due
    WentOnline,
    WentOffline,
    /// Repeated payload, nothing to do
    Unchanged,
}

#[derive(Debug, Default)]
pub struct AvailabilityTracker {
    state: Availability,
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Availability {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == Availability::Online
    }

    pub fn is_offline(&self) -> bool {
        self.state == Availability::Offline
    }

    pub fn handle(&mut self, lwt: Lwt) -> Transition {
        let next = match lwt {
            Lwt::Online => Availability::Online,
            Lwt::Offline => Availability::Offline,
        };

        if next == self.state {
            return Transition::Unchanged;
        }
        self.state = next;

        match next {
            Availability::Online => Transition::WentOnline,
            _ => Transition::WentOffline,
        }
    }
}
