//! `spinscan-types` – shared vocabulary of the spinscan workspace.
//!
//! Message shapes mirror the ROS messages the node exchanges with the outside
//! world (`sensor_msgs/LaserScan`, `dynamixel_msgs/JointState`,
//! `tf2_msgs/TFMessage`) so that they can be decoded straight from rosbridge
//! JSON, plus the [`Event`] envelope routed over the internal event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

// ────────────────────────────────────────────────────────────────────────────
// Identifiers & time
// ────────────────────────────────────────────────────────────────────────────

/// Identifies one rangefinder mounted on the rotating platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u8);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "laser{}", self.0)
    }
}

/// A ROS time stamp.
///
/// Serialises with the ROS 1 field names (`secs` / `nsecs`) and also accepts
/// the ROS 2 spelling (`sec` / `nanosec`) on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(rename = "secs", alias = "sec")]
    pub sec: i32,
    #[serde(rename = "nsecs", alias = "nanosec")]
    pub nanosec: u32,
}

impl Stamp {
    pub fn new(sec: i32, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }

    /// Build a stamp from floating-point seconds, rounding to the nearest
    /// nanosecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.floor();
        let mut sec = whole as i32;
        let mut nanosec = ((secs - whole) * NANOS_PER_SEC).round() as u32;
        if nanosec >= 1_000_000_000 {
            sec += 1;
            nanosec -= 1_000_000_000;
        }
        Self { sec, nanosec }
    }

    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.sec) + f64::from(self.nanosec) / NANOS_PER_SEC
    }

    /// Return this stamp shifted by `secs` seconds.
    pub fn offset(self, secs: f64) -> Self {
        Self::from_secs_f64(self.as_secs_f64() + secs)
    }
}

/// `std_msgs/Header` without the sequence counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub stamp: Stamp,
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Stamp, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D space (single precision, like a PCL `PointXYZ`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Distance from the Z axis.
    pub fn radial_distance(&self) -> f32 {
        self.x.hypot(self.y)
    }
}

/// `geometry_msgs/Vector3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3Msg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `geometry_msgs/Quaternion`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionMsg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for QuaternionMsg {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// `geometry_msgs/Transform`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformMsg {
    pub translation: Vector3Msg,
    pub rotation: QuaternionMsg,
}

/// `geometry_msgs/TransformStamped`: pose of `child_frame_id` expressed in
/// `header.frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: TransformMsg,
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor messages
// ────────────────────────────────────────────────────────────────────────────

/// `sensor_msgs/LaserScan`: one sweep of a planar rangefinder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    #[serde(default)]
    pub time_increment: f32,
    #[serde(default)]
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    #[serde(default)]
    pub ranges: Vec<f32>,
    #[serde(default)]
    pub intensities: Vec<f32>,
}

impl LaserScan {
    /// Time spanned by the sweep: `ranges.len() * time_increment` seconds.
    pub fn scan_duration(&self) -> f64 {
        self.ranges.len() as f64 * f64::from(self.time_increment)
    }
}

/// The subset of `dynamixel_msgs/JointState` the node consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AngleReading {
    #[serde(default)]
    pub name: String,
    pub current_pos: f64,
}

/// An accumulated cloud ready to be published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Point3>,
}

impl PointCloud {
    pub fn new(header: Header, points: Vec<Point3>) -> Self {
        Self { header, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "spinscan-middleware::rosbridge/laser/scan1"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly identified, timestamped envelope.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A raw scan from one rangefinder.
    Scan { device: DeviceId, scan: LaserScan },
    /// Latest platform angle reported by the motor controller.
    Angle(AngleReading),
    /// A batch of frame transforms (`/tf` or `/tf_static`).
    Transforms {
        transforms: Vec<StampedTransform>,
        is_static: bool,
    },
    /// The full accumulated cloud of one device.
    Cloud { device: DeviceId, cloud: PointCloud },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning transport, decoding and configuration failures.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum SpinError {
    #[error("Transform unavailable from {source_frame} to {target_frame}: {reason}")]
    TransformUnavailable {
        source_frame: String,
        target_frame: String,
        reason: String,
    },

    #[error("Invalid scan: {0}")]
    InvalidScan(String),

    #[error("Middleware Channel Error: {0}")]
    Channel(String),

    #[error("Middleware Serialization Error: {0}")]
    Serialization(String),

    #[error("Message Parsing Error: {0}")]
    Parsing(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_round_trips_through_seconds() {
        let stamp = Stamp::new(1_700_000_000, 250_000_000);
        let back = Stamp::from_secs_f64(stamp.as_secs_f64());
        assert_eq!(back.sec, stamp.sec);
        assert!((i64::from(back.nanosec) - 250_000_000).abs() < 1_000);
    }

    #[test]
    fn stamp_offset_carries_into_seconds() {
        let stamp = Stamp::new(10, 900_000_000).offset(0.2);
        assert_eq!(stamp.sec, 11);
        assert!((i64::from(stamp.nanosec) - 100_000_000).abs() < 10);
    }

    #[test]
    fn stamp_accepts_ros1_and_ros2_field_names() {
        let ros1: Stamp = serde_json::from_str(r#"{"secs":3,"nsecs":5}"#).unwrap();
        let ros2: Stamp = serde_json::from_str(r#"{"sec":3,"nanosec":5}"#).unwrap();
        assert_eq!(ros1, ros2);
        let out = serde_json::to_string(&ros1).unwrap();
        assert!(out.contains("\"secs\":3"));
    }

    #[test]
    fn scan_duration_is_count_times_increment() {
        let scan = LaserScan {
            time_increment: 0.001,
            ranges: vec![1.0; 360],
            ..Default::default()
        };
        assert!((scan.scan_duration() - 0.36).abs() < 1e-6);
    }

    #[test]
    fn empty_scan_has_zero_duration() {
        let scan = LaserScan {
            time_increment: 0.001,
            ..Default::default()
        };
        assert_eq!(scan.scan_duration(), 0.0);
    }

    #[test]
    fn laser_scan_decodes_without_optional_fields() {
        let json = r#"{
            "header": {"stamp": {"secs": 1, "nsecs": 0}, "frame_id": "laser1"},
            "angle_min": -1.57, "angle_max": 1.57, "angle_increment": 0.01,
            "range_min": 0.02, "range_max": 4.0,
            "ranges": [0.5, 0.6]
        }"#;
        let scan: LaserScan = serde_json::from_str(json).unwrap();
        assert_eq!(scan.header.frame_id, "laser1");
        assert_eq!(scan.ranges.len(), 2);
        assert!(scan.intensities.is_empty());
    }

    #[test]
    fn angle_reading_ignores_unrelated_joint_fields() {
        let json = r#"{"name":"tilt","motor_ids":[1],"goal_pos":0.0,"current_pos":0.42,"is_moving":true}"#;
        let reading: AngleReading = serde_json::from_str(json).unwrap();
        assert!((reading.current_pos - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn radial_distance_ignores_height() {
        let p = Point3::new(3.0, 4.0, 100.0);
        assert!((p.radial_distance() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn device_id_displays_as_laser_frame() {
        assert_eq!(DeviceId(2).to_string(), "laser2");
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "spinscan-middleware::rosbridge/motor",
            EventPayload::Angle(AngleReading {
                name: "tilt".to_string(),
                current_pos: 0.05,
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn spin_error_display() {
        let err = SpinError::TransformUnavailable {
            source_frame: "laser1".to_string(),
            target_frame: "world".to_string(),
            reason: "timed out".to_string(),
        };
        assert!(err.to_string().contains("laser1"));
        assert!(SpinError::Config("bad".into()).to_string().contains("Configuration"));
    }
}
