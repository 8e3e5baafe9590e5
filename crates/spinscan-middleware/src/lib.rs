//! `spinscan-middleware` – message plumbing.
//!
//! Routes scans, angle readings, transforms and accumulated clouds between the
//! fusion runtime and the ROS graph without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`rosbridge`] – rosbridge WebSocket client translating ROS JSON traffic
//!   to and from bus events.

pub mod bus;
pub mod rosbridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use rosbridge::{RosbridgeClient, RosbridgeRoutes};
