//! `spinscan-perception` – from raw scans to cropped, gated point sets.
//!
//! # Modules
//!
//! - [`transform`] – [`TfBuffer`][transform::TfBuffer] and
//!   [`TransformListener`][transform::TransformListener]: time-indexed frame
//!   tree answering "where was this sensor at time t?", with a blocking wait.
//! - [`projection`] – [`LaserProjector`][projection::LaserProjector]: turns a
//!   planar laser scan into world-frame points.
//! - [`crop`] – [`CropFilter`][crop::CropFilter]: height, radial and
//!   device-proximity bounds.
//! - [`gate`] – [`StartGate`][gate::StartGate] and
//!   [`PlatformState`][gate::PlatformState]: one-shot latch on the platform
//!   angle.
//! - [`accumulator`] – [`PointAccumulator`][accumulator::PointAccumulator]:
//!   monotonically growing per-device point set.

pub mod accumulator;
pub mod crop;
pub mod gate;
pub mod projection;
pub mod transform;

pub use accumulator::PointAccumulator;
pub use crop::{CropBounds, CropFilter, PROXIMITY_TOLERANCE};
pub use gate::{GateState, PlatformState, StartGate};
pub use projection::{LaserProjector, ScanProjector};
pub use transform::{TfBuffer, TfError, Transform3D, TransformListener, TransformSource};
