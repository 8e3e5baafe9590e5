//! Per-device running union of accepted points.

use spinscan_types::{Header, Point3, PointCloud};

/// Grows monotonically: points are appended, never removed or deduplicated.
#[derive(Debug, Clone, Default)]
pub struct PointAccumulator {
    points: Vec<Point3>,
}

impl PointAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every point of `accepted`; returns how many were added.
    pub fn merge(&mut self, accepted: impl IntoIterator<Item = Point3>) -> usize {
        let before = self.points.len();
        self.points.extend(accepted);
        self.points.len() - before
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy of the full accumulated set, tagged with `header`.
    pub fn snapshot(&self, header: Header) -> PointCloud {
        PointCloud::new(header, self.points.clone())
    }
}
