//! Crop filter.
//!
//! Keeps only the points inside a cylinder centred on the world Z axis
//! (`0 <= z <= max_z`, `hypot(x, y) <= max_radius`).  Devices that opt into
//! the proximity check additionally drop points farther than
//! [`PROXIMITY_TOLERANCE`] (in the XY plane) from the device's own origin.

use spinscan_types::Point3;

/// Maximum XY distance between a point and its device origin when the
/// proximity check is enabled.
pub const PROXIMITY_TOLERANCE: f32 = 0.25;

pub const DEFAULT_MAX_Z: f32 = 0.25;
pub const DEFAULT_MAX_RADIUS: f32 = 0.127;

/// Height and radial limits, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropBounds {
    pub max_z: f32,
    pub max_radius: f32,
}

impl Default for CropBounds {
    fn default() -> Self {
        Self {
            max_z: DEFAULT_MAX_Z,
            max_radius: DEFAULT_MAX_RADIUS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CropFilter {
    bounds: CropBounds,
}

impl CropFilter {
    pub fn new(bounds: CropBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> CropBounds {
        self.bounds
    }

    /// Decide whether `point` survives cropping.
    ///
    /// `device_origin` is the world-frame position of the scanning device when
    /// the proximity check applies, `None` otherwise.  NaN coordinates are
    /// always rejected.
    pub fn accept(&self, point: &Point3, device_origin: Option<&Point3>) -> bool {
        if !(0.0..=self.bounds.max_z).contains(&point.z) {
            return false;
        }
        if !(point.radial_distance() <= self.bounds.max_radius) {
            return false;
        }
        match device_origin {
            Some(origin) => (origin.x - point.x).hypot(origin.y - point.y) <= PROXIMITY_TOLERANCE,
            None => true,
        }
    }

    /// Single-pass filter returning the accepted points in input order.
    pub fn apply<'a>(
        &self,
        points: impl IntoIterator<Item = &'a Point3>,
        device_origin: Option<&Point3>,
    ) -> Vec<Point3> {
        points
            .into_iter()
            .filter(|p| self.accept(p, device_origin))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CropFilter {
        CropFilter::new(CropBounds::default())
    }

    #[test]
    fn accepts_point_inside_cylinder() {
        assert!(filter().accept(&Point3::new(0.05, 0.02, 0.1), None));
    }

    #[test]
    fn rejects_point_above_max_z() {
        assert!(!filter().accept(&Point3::new(0.05, 0.02, 0.3), None));
    }

    #[test]
    fn rejects_point_below_floor() {
        assert!(!filter().accept(&Point3::new(0.0, 0.0, -0.001), None));
    }

    #[test]
    fn bounds_are_inclusive() {
        let f = CropFilter::new(CropBounds {
            max_z: 0.5,
            max_radius: 0.5,
        });
        assert!(f.accept(&Point3::new(0.5, 0.0, 0.5), None));
        assert!(f.accept(&Point3::new(0.0, 0.0, 0.0), None));
    }

    #[test]
    fn rejects_point_outside_radius() {
        assert!(!filter().accept(&Point3::new(0.1, 0.1, 0.1), None));
    }

    #[test]
    fn rejects_nan() {
        assert!(!filter().accept(&Point3::new(f32::NAN, 0.0, 0.1), None));
        assert!(!filter().accept(&Point3::new(0.0, 0.0, f32::NAN), None));
    }

    #[test]
    fn proximity_rejects_points_far_from_device() {
        let f = CropFilter::new(CropBounds {
            max_z: 1.0,
            max_radius: 1.0,
        });
        let origin = Point3::new(0.5, 0.0, 0.8);
        assert!(f.accept(&Point3::new(0.4, 0.1, 0.0), Some(&origin)));
        assert!(!f.accept(&Point3::new(-0.1, 0.0, 0.0), Some(&origin)));
        // The device height plays no part in the proximity distance.
        assert!(f.accept(&Point3::new(0.5, 0.0, 0.0), Some(&origin)));
    }

    #[test]
    fn apply_keeps_order_and_is_repeatable() {
        let points = vec![
            Point3::new(0.05, 0.02, 0.1),
            Point3::new(0.05, 0.02, 0.3),
            Point3::new(0.0, 0.1, 0.2),
            Point3::new(0.2, 0.0, 0.1),
        ];
        let once = filter().apply(&points, None);
        assert_eq!(once, vec![points[0], points[2]]);
        let twice = filter().apply(&once, None);
        assert_eq!(twice, once);
    }
}
