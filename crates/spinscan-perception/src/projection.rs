//! Scan-to-cloud projection.
//!
//! A [`ScanProjector`] turns one planar [`LaserScan`] into 3-D points expressed
//! in a target frame.  [`LaserProjector`] compensates for sensor motion during
//! the sweep: the sensor pose is resolved at the first and last ray and every
//! ray is projected with the pose interpolated at its own index.

use spinscan_types::{Header, LaserScan, Point3, PointCloud};

use crate::transform::{TfError, TransformSource, Vec3};

/// Converts a raw scan into a cloud in `target_frame`.
pub trait ScanProjector: Send + Sync {
    fn project(
        &self,
        scan: &LaserScan,
        target_frame: &str,
        tf: &dyn TransformSource,
    ) -> Result<PointCloud, TfError>;
}

/// High-fidelity projector with per-ray pose interpolation.
///
/// Rays whose range is non-finite or outside `[range_min, range_max)` carry
/// no return and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaserProjector;

impl ScanProjector for LaserProjector {
    fn project(
        &self,
        scan: &LaserScan,
        target_frame: &str,
        tf: &dyn TransformSource,
    ) -> Result<PointCloud, TfError> {
        let count = scan.ranges.len();
        let start_stamp = scan.header.stamp;
        let sweep = count.saturating_sub(1) as f64 * f64::from(scan.time_increment);

        let start = tf.lookup_transform(target_frame, &scan.header.frame_id, start_stamp)?;
        let end = if sweep == 0.0 {
            start
        } else {
            tf.lookup_transform(
                target_frame,
                &scan.header.frame_id,
                start_stamp.offset(sweep),
            )?
        };

        let last_index = count.saturating_sub(1).max(1) as f64;
        let points = scan
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| {
                range.is_finite() && **range >= scan.range_min && **range < scan.range_max
            })
            .map(|(i, &range)| {
                let bearing = f64::from(scan.angle_min) + i as f64 * f64::from(scan.angle_increment);
                let range = f64::from(range);
                let local = Vec3::new(range * bearing.cos(), range * bearing.sin(), 0.0);
                let pose = start.interpolate(end, i as f64 / last_index);
                let world = pose.apply(local);
                Point3::new(world.x as f32, world.y as f32, world.z as f32)
            })
            .collect();

        Ok(PointCloud::new(Header::new(start_stamp, target_frame), points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quaternion, Transform3D, TransformListener};
    use spinscan_types::Stamp;
    use std::f32::consts::FRAC_PI_2;

    fn scan(ranges: Vec<f32>) -> LaserScan {
        LaserScan {
            header: Header::new(Stamp::new(100, 0), "laser1"),
            angle_min: 0.0,
            angle_max: FRAC_PI_2,
            angle_increment: FRAC_PI_2,
            time_increment: 0.0,
            range_min: 0.05,
            range_max: 2.0,
            ranges,
            ..Default::default()
        }
    }

    fn mounted_listener(z: f64) -> TransformListener {
        let tf = TransformListener::default();
        tf.insert(
            "world",
            "laser1",
            Stamp::new(0, 0),
            Transform3D::new(Vec3::new(0.0, 0.0, z), Quaternion::identity()),
            true,
        )
        .unwrap();
        tf
    }

    #[test]
    fn projects_rays_into_target_frame() {
        let tf = mounted_listener(0.1);
        let cloud = LaserProjector.project(&scan(vec![1.0, 0.5]), "world", &tf).unwrap();

        assert_eq!(cloud.header.frame_id, "world");
        assert_eq!(cloud.header.stamp, Stamp::new(100, 0));
        assert_eq!(cloud.len(), 2);
        let (a, b) = (cloud.points[0], cloud.points[1]);
        assert!((a.x - 1.0).abs() < 1e-5 && a.y.abs() < 1e-5 && (a.z - 0.1).abs() < 1e-5);
        assert!(b.x.abs() < 1e-5 && (b.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn skips_rays_without_return() {
        let tf = mounted_listener(0.0);
        let cloud = LaserProjector
            .project(&scan(vec![f32::INFINITY, 0.01, 2.0, f32::NAN, 1.0]), "world", &tf)
            .unwrap();
        assert_eq!(cloud.len(), 1);
    }

    #[test]
    fn empty_scan_yields_empty_cloud() {
        let tf = mounted_listener(0.0);
        let cloud = LaserProjector.project(&scan(Vec::new()), "world", &tf).unwrap();
        assert!(cloud.is_empty());
    }

    #[test]
    fn missing_transform_is_an_error() {
        let tf = TransformListener::default();
        assert!(LaserProjector.project(&scan(vec![1.0]), "world", &tf).is_err());
    }

    #[test]
    fn interpolates_pose_across_the_sweep() {
        let tf = TransformListener::default();
        tf.insert("world", "laser1", Stamp::new(100, 0), Transform3D::identity(), false)
            .unwrap();
        tf.insert(
            "world",
            "laser1",
            Stamp::new(101, 0),
            Transform3D::new(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()),
            false,
        )
        .unwrap();

        let mut sweep = scan(vec![1.0, 1.0, 1.0]);
        sweep.angle_increment = 0.0;
        sweep.time_increment = 0.5;

        let cloud = LaserProjector.project(&sweep, "world", &tf).unwrap();
        let heights: Vec<f32> = cloud.points.iter().map(|p| p.z).collect();
        assert!((heights[0] - 0.0).abs() < 1e-5);
        assert!((heights[1] - 0.5).abs() < 1e-5);
        assert!((heights[2] - 1.0).abs() < 1e-5);
    }
}
