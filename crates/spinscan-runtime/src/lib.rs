//! `spinscan-runtime` – the fusion node.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`DeviceDispatcher`][dispatcher::DeviceDispatcher]:
//!   runs one device's scans through pose wait, projection, cropping, the
//!   start gate and accumulation.
//! - [`node`] – [`FusionNode`][node::FusionNode]: wires the dispatchers, the
//!   angle handler and the transform feed to the event bus.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: structured
//!   logging with optional OTLP export.

pub mod dispatcher;
pub mod node;
pub mod telemetry;

pub use dispatcher::{DeviceConfig, DeviceDispatcher, FusionSettings, ScanDropped};
pub use node::FusionNode;
