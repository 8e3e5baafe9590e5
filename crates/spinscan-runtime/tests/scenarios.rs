//! End-to-end behaviour of two dispatchers sharing one platform state.

use std::sync::Arc;
use std::time::Duration;

use spinscan_perception::transform::{Quaternion, Transform3D, Vec3};
use spinscan_perception::{
    CropBounds, GateState, LaserProjector, PlatformState, ScanProjector, TfError,
    TransformListener, TransformSource,
};
use spinscan_runtime::{DeviceConfig, DeviceDispatcher, FusionSettings, ScanDropped};
use spinscan_types::{DeviceId, Header, LaserScan, Point3, PointCloud, Stamp};

/// Projects every scan to a fixed batch, after checking the sensor pose exists.
struct FixedProjector(Vec<Point3>);

impl ScanProjector for FixedProjector {
    fn project(
        &self,
        scan: &LaserScan,
        target_frame: &str,
        tf: &dyn TransformSource,
    ) -> Result<PointCloud, TfError> {
        tf.lookup_transform(target_frame, &scan.header.frame_id, scan.header.stamp)?;
        Ok(PointCloud::new(
            Header::new(scan.header.stamp, target_frame),
            self.0.clone(),
        ))
    }
}

/// Emits a fixed batch without consulting the transform service.
struct BlindProjector(Vec<Point3>);

impl ScanProjector for BlindProjector {
    fn project(
        &self,
        scan: &LaserScan,
        target_frame: &str,
        _tf: &dyn TransformSource,
    ) -> Result<PointCloud, TfError> {
        Ok(PointCloud::new(
            Header::new(scan.header.stamp, target_frame),
            self.0.clone(),
        ))
    }
}

fn settings() -> FusionSettings {
    FusionSettings {
        world_frame: "world".to_string(),
        crop: CropBounds {
            max_z: 0.25,
            max_radius: 0.127,
        },
        transform_wait: Duration::from_millis(20),
    }
}

fn laser1(
    platform: Arc<PlatformState>,
    tf: TransformListener,
    projector: Arc<dyn ScanProjector>,
) -> DeviceDispatcher {
    DeviceDispatcher::new(
        DeviceConfig {
            id: DeviceId(1),
            frame: "laser1".to_string(),
            proximity_check: true,
        },
        &settings(),
        platform,
        Arc::new(tf),
        projector,
    )
}

/// laser1 only has poses between t = 2 s and t = 3 s.
fn late_listener() -> TransformListener {
    let tf = TransformListener::default();
    for secs in [2, 3] {
        tf.insert(
            "world",
            "laser1",
            Stamp::new(secs, 0),
            Transform3D::new(Vec3::new(0.0, 0.0, 0.2), Quaternion::identity()),
            false,
        )
        .unwrap();
    }
    tf
}

/// Ten rays 0.1 s apart stamped at 1.5 s: the sweep ends inside the pose
/// history, the first ray does not.
fn early_scan() -> LaserScan {
    LaserScan {
        header: Header::new(Stamp::new(1, 500_000_000), "laser1"),
        time_increment: 0.1,
        range_max: 4.0,
        ranges: vec![0.1; 10],
        ..Default::default()
    }
}

struct Rig {
    platform: Arc<PlatformState>,
    laser1: DeviceDispatcher,
    laser2: DeviceDispatcher,
}

fn rig(batch: Vec<Point3>) -> Rig {
    let tf = TransformListener::default();
    tf.insert(
        "world",
        "laser1",
        Stamp::new(0, 0),
        Transform3D::new(Vec3::new(0.0, 0.0, 0.2), Quaternion::identity()),
        true,
    )
    .unwrap();
    let settings = settings();
    let platform = Arc::new(PlatformState::new());
    let tf: Arc<dyn TransformSource> = Arc::new(tf);
    let projector: Arc<dyn ScanProjector> = Arc::new(FixedProjector(batch));
    let make = |id: u8, proximity_check: bool| {
        DeviceDispatcher::new(
            DeviceConfig {
                id: DeviceId(id),
                frame: format!("laser{id}"),
                proximity_check,
            },
            &settings,
            Arc::clone(&platform),
            Arc::clone(&tf),
            Arc::clone(&projector),
        )
    };
    Rig {
        laser1: make(1, true),
        laser2: make(2, false),
        platform,
    }
}

fn scan(device: u8, secs: i32) -> LaserScan {
    LaserScan {
        header: Header::new(Stamp::new(secs, 0), format!("laser{device}")),
        time_increment: 0.0001,
        range_max: 4.0,
        ranges: vec![0.1; 10],
        ..Default::default()
    }
}

#[test]
fn gate_closed_point_is_cropped_but_not_merged() {
    let mut rig = rig(vec![Point3::new(0.05, 0.02, 0.1)]);
    rig.platform.update_angle(0.5);

    let cloud = rig.laser1.handle_scan(scan(1, 1)).unwrap();
    assert!(cloud.is_empty());
    assert_eq!(rig.platform.gate_state(), GateState::Closed);
}

#[test]
fn gate_opening_merges_the_next_accepted_batch() {
    let point = Point3::new(0.05, 0.02, 0.1);
    let mut rig = rig(vec![point]);
    rig.platform.update_angle(0.5);
    let before = rig.laser1.handle_scan(scan(1, 1)).unwrap().len();

    rig.platform.update_angle(0.05);
    let cloud = rig.laser1.handle_scan(scan(1, 2)).unwrap();
    assert_eq!(cloud.len(), before + 1);
    assert!(cloud.points.contains(&point));
    assert_eq!(rig.platform.gate_state(), GateState::Open);
}

#[test]
fn too_high_point_is_rejected_regardless_of_gate() {
    let mut rig = rig(vec![Point3::new(0.05, 0.02, 0.3)]);
    rig.platform.update_angle(0.5);
    assert!(rig.laser1.handle_scan(scan(1, 1)).unwrap().is_empty());
    rig.platform.update_angle(0.0);
    assert!(rig.laser1.handle_scan(scan(1, 2)).unwrap().is_empty());
}

#[test]
fn unavailable_transform_drops_scan_and_keeps_set() {
    let mut rig = rig(vec![Point3::new(0.05, 0.02, 0.1)]);
    rig.platform.update_angle(0.0);
    assert_eq!(rig.laser1.handle_scan(scan(1, 1)).unwrap().len(), 1);

    // No pose is ever published for laser2.
    let result = rig.laser2.handle_scan(scan(2, 1));
    assert!(matches!(result, Err(ScanDropped::TransformTimeout(_))));
    assert!(rig.laser2.accumulated().is_empty());
    assert_eq!(rig.laser1.accumulated().len(), 1);
}

#[test]
fn gate_never_recloses() {
    let mut rig = rig(vec![Point3::new(0.05, 0.02, 0.1)]);
    rig.platform.update_angle(0.02);
    rig.laser1.handle_scan(scan(1, 1)).unwrap();

    rig.platform.update_angle(2.5);
    assert_eq!(rig.platform.observe_gate(), GateState::Open);
    let cloud = rig.laser1.handle_scan(scan(1, 2)).unwrap();
    assert_eq!(cloud.len(), 2);
}

#[test]
fn emitted_sets_grow_monotonically_and_respect_bounds() {
    let batch = vec![
        Point3::new(0.05, 0.02, 0.1),
        Point3::new(0.0, 0.0, 0.25),
        Point3::new(0.2, 0.0, 0.1),
        Point3::new(0.0, 0.0, -0.05),
        Point3::new(0.09, 0.09, 0.0),
    ];
    let mut rig = rig(batch);
    let mut previous = 0;
    for (cycle, angle) in [0.9, 0.4, 0.08, 1.3, -0.7, 0.0].into_iter().enumerate() {
        rig.platform.update_angle(angle);
        let cloud = rig.laser1.handle_scan(scan(1, cycle as i32 + 1)).unwrap();
        assert!(cloud.len() >= previous);
        assert!(
            cloud
                .points
                .iter()
                .all(|p| (0.0..=0.25).contains(&p.z) && p.radial_distance() <= 0.127)
        );
        previous = cloud.len();
    }
    // Two of the five points pass; four cycles ran with the gate open.
    assert_eq!(previous, 8);
}

#[test]
fn reference_lookup_failure_drops_scan() {
    let platform = Arc::new(PlatformState::new());
    platform.update_angle(0.0);
    let projector = Arc::new(BlindProjector(vec![Point3::new(0.05, 0.02, 0.1)]));
    let mut laser = laser1(platform, late_listener(), projector);

    let result = laser.handle_scan(early_scan());
    assert!(matches!(
        result,
        Err(ScanDropped::ReferenceUnavailable(TfError::Extrapolation { .. }))
    ));
    assert!(laser.accumulated().is_empty());
}

#[test]
fn projection_failure_drops_scan() {
    let platform = Arc::new(PlatformState::new());
    platform.update_angle(0.0);
    let projector = Arc::new(FixedProjector(vec![Point3::new(0.05, 0.02, 0.1)]));
    let mut laser = laser1(platform, late_listener(), projector);

    let result = laser.handle_scan(early_scan());
    assert!(matches!(result, Err(ScanDropped::ProjectionFailed(_))));
    assert!(laser.accumulated().is_empty());
}

#[test]
fn empty_scan_emits_the_unchanged_set() {
    let tf = TransformListener::default();
    tf.insert(
        "world",
        "laser1",
        Stamp::new(0, 0),
        Transform3D::new(Vec3::new(0.0, 0.0, 0.2), Quaternion::identity()),
        true,
    )
    .unwrap();
    let platform = Arc::new(PlatformState::new());
    platform.update_angle(0.0);
    let mut laser = laser1(platform, tf, Arc::new(LaserProjector));

    let mut first = scan(1, 1);
    first.ranges = vec![0.1; 3];
    assert_eq!(laser.handle_scan(first).unwrap().len(), 3);

    let mut empty = scan(1, 2);
    empty.ranges.clear();
    let cloud = laser.handle_scan(empty).unwrap();
    assert_eq!(cloud.len(), 3);
    assert_eq!(laser.accumulated().len(), 3);
}
