//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Scan`] | Raw laser scans of one device |
//! | [`Topic::Cloud`] | Accumulated clouds of one device, on their way out |
//! | [`Topic::Angle`] | Platform angle readings from the motor controller |
//! | [`Topic::Transforms`] | `/tf` and `/tf_static` batches |
//!
//! Per-device lanes are created lazily the first time they are published to
//! or subscribed on, so the bus does not need to know the device set up front.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use spinscan_types::{DeviceId, Event, SpinError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound scans of a single rangefinder.
    Scan(DeviceId),
    /// Outbound accumulated cloud of a single rangefinder.
    Cloud(DeviceId),
    /// Latest-value platform angle.
    Angle,
    /// Frame transform updates.
    Transforms,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    capacity: usize,
    lanes: Arc<RwLock<HashMap<Topic, broadcast::Sender<Event>>>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lanes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`SpinError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, SpinError> {
        self.lane(topic)
            .send(event)
            .map_err(|_| SpinError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.lane(topic).subscribe(),
        }
    }

    /// Number of receivers currently attached to `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn lane(&self, topic: Topic) -> broadcast::Sender<Event> {
        if let Some(sender) = self
            .lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
        {
            return sender.clone();
        }
        self.lanes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
