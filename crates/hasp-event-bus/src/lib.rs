//! Event bus with typed pub/sub
//!
//! The bus carries `state_changed` events from the state machine to the plate
//! runners, and the plate online/offline events to whoever listens. Events are
//! stored as JSON on the wire and decoded by typed receivers.

use dashmap::DashMap;
use hasp_core::{Context, Event, EventData, EventType};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type RawEvent = Event<serde_json::Value>;

/// Broadcast hub keyed by event type
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<RawEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, event_type: EventType) -> broadcast::Sender<RawEvent> {
        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to raw events of a specific type
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<RawEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");
        self.sender(event_type).subscribe()
    }

    /// Subscribe to events carrying `T`
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: PhantomData,
        }
    }

    /// Fire an event, returning how many receivers got it
    pub fn fire(&self, event: RawEvent) -> usize {
        debug!(event_type = %event.event_type, "Firing event");

        match self.channels.get(&event.event_type) {
            // A send error only means nobody is listening right now
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) -> usize {
        let event = Event::typed(data, context);
        match serde_json::to_value(&event.data) {
            Ok(json) => self.fire(event.with_data(json)),
            Err(err) => {
                error!(event_type = %event.event_type, %err, "Event data does not serialize");
                0
            }
        }
    }

    /// Number of event types that have ever been subscribed to
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<RawEvent>,
    _phantom: PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Receive the next event whose data decodes as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Some(typed) = Self::decode(event) {
                return Ok(typed);
            }
        }
    }

    /// Take an already queued event without waiting
    pub fn try_recv(&mut self) -> Result<Event<T>, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if let Some(typed) = Self::decode(event) {
                return Ok(typed);
            }
        }
    }

    fn decode(event: RawEvent) -> Option<Event<T>> {
        let data = serde_json::from_value::<T>(event.data.clone()).ok()?;
        Some(event.with_data(data))
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
