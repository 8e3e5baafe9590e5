//! Per-device scan dispatcher.
//!
//! Sequences one scan through the pipeline:
//!
//! ```text
//! wait for pose ─► project ─► crop ─► gate check ─► merge ─► emit
//! ```
//!
//! Every stage that needs the Pose/Transform Service can fail; any failure
//! drops the scan without touching the accumulated set and without emitting.

use std::sync::Arc;
use std::time::Duration;

use spinscan_perception::{
    CropBounds, CropFilter, GateState, PlatformState, PointAccumulator, ScanProjector, TfError,
    TransformSource,
};
use spinscan_types::{DeviceId, LaserScan, Point3, PointCloud};
use thiserror::Error;
use tracing::{debug, instrument};

/// Default bound on the blocking wait for a sensor pose.
pub const DEFAULT_TRANSFORM_WAIT: Duration = Duration::from_secs(1);

/// One rangefinder as seen by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// TF frame the device publishes its scans in.
    pub frame: String,
    /// Drop points farther than the proximity tolerance from this device.
    pub proximity_check: bool,
}

/// Settings shared by every dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionSettings {
    pub world_frame: String,
    pub crop: CropBounds,
    pub transform_wait: Duration,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            world_frame: "world".to_string(),
            crop: CropBounds::default(),
            transform_wait: DEFAULT_TRANSFORM_WAIT,
        }
    }
}

/// Why a scan was discarded.
#[derive(Debug, Error)]
pub enum ScanDropped {
    #[error("sensor pose not available in time: {0}")]
    TransformTimeout(TfError),

    #[error("projection failed: {0}")]
    ProjectionFailed(TfError),

    #[error("proximity reference unavailable: {0}")]
    ReferenceUnavailable(TfError),
}

impl ScanDropped {
    /// `true` when the pose simply had not arrived yet.  The other reasons
    /// mean the tf tree cannot serve a pose it already waited for.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransformTimeout(_))
    }
}

/// Owns one device's accumulated cloud and runs its scans through the
/// pipeline.  The angle and gate live in the shared [`PlatformState`].
pub struct DeviceDispatcher {
    device: DeviceConfig,
    world_frame: String,
    transform_wait: Duration,
    crop: CropFilter,
    platform: Arc<PlatformState>,
    tf: Arc<dyn TransformSource>,
    projector: Arc<dyn ScanProjector>,
    cloud: PointAccumulator,
}

impl DeviceDispatcher {
    pub fn new(
        device: DeviceConfig,
        settings: &FusionSettings,
        platform: Arc<PlatformState>,
        tf: Arc<dyn TransformSource>,
        projector: Arc<dyn ScanProjector>,
    ) -> Self {
        Self {
            device,
            world_frame: settings.world_frame.clone(),
            transform_wait: settings.transform_wait,
            crop: CropFilter::new(settings.crop),
            platform,
            tf,
            projector,
            cloud: PointAccumulator::new(),
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// The accumulated set so far.
    pub fn accumulated(&self) -> &PointAccumulator {
        &self.cloud
    }

    /// Process one scan and return the full accumulated cloud to emit.
    ///
    /// Blocks for at most the configured transform wait.  Scans that arrive
    /// without a frame id are assumed to come from the device's own frame.
    #[instrument(
        skip_all,
        fields(device = %self.device.id, stamp = scan.header.stamp.as_secs_f64())
    )]
    pub fn handle_scan(&mut self, mut scan: LaserScan) -> Result<PointCloud, ScanDropped> {
        if scan.header.frame_id.is_empty() {
            scan.header.frame_id = self.device.frame.clone();
        }
        let stamp = scan.header.stamp;

        self.tf
            .wait_for_transform(
                &self.world_frame,
                &self.device.frame,
                stamp.offset(scan.scan_duration()),
                self.transform_wait,
            )
            .map_err(ScanDropped::TransformTimeout)?;

        let projected = self
            .projector
            .project(&scan, &self.world_frame, self.tf.as_ref())
            .map_err(ScanDropped::ProjectionFailed)?;

        let origin = if self.device.proximity_check {
            let pose = self
                .tf
                .lookup_transform(&self.world_frame, &self.device.frame, stamp)
                .map_err(ScanDropped::ReferenceUnavailable)?;
            Some(Point3::new(
                pose.translation.x as f32,
                pose.translation.y as f32,
                pose.translation.z as f32,
            ))
        } else {
            None
        };
        let accepted = self.crop.apply(&projected.points, origin.as_ref());

        let added = match self.platform.observe_gate() {
            GateState::Open => self.cloud.merge(accepted),
            GateState::Closed => 0,
        };
        debug!(
            projected = projected.len(),
            added,
            total = self.cloud.len(),
            "scan processed"
        );

        Ok(self.cloud.snapshot(projected.header))
    }
}
