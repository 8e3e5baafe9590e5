//! Node configuration – read once from `~/.spinscan/config.toml`.
//!
//! A missing file means "run with the defaults".  Values are never reloaded
//! after startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use spinscan_middleware::RosbridgeRoutes;
use spinscan_perception::CropBounds;
use spinscan_runtime::dispatcher::DEFAULT_TRANSFORM_WAIT;
use spinscan_runtime::{DeviceConfig, FusionSettings};
use spinscan_types::{DeviceId, SpinError};

/// Upper bound on `transform_wait_secs`.
pub const MAX_TRANSFORM_WAIT_SECS: f64 = 60.0;

/// One rangefinder and the topics it is wired to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceEntry {
    pub id: u8,
    /// TF frame of the scans.
    pub frame: String,
    pub scan_topic: String,
    /// Topic the accumulated cloud is published on.
    pub cloud_topic: String,
    #[serde(default)]
    pub proximity_check: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// WebSocket URL of the rosbridge server.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    #[serde(default = "default_world_frame")]
    pub world_frame: String,

    /// Motor controller state topic carrying the platform angle.
    #[serde(default = "default_angle_topic")]
    pub angle_topic: String,

    #[serde(default = "default_max_z")]
    pub max_z: f32,

    #[serde(default = "default_max_radius")]
    pub max_radius: f32,

    /// Bound on the wait for a scan's sensor pose.
    #[serde(default = "default_transform_wait_secs")]
    pub transform_wait_secs: f64,

    /// History kept per transform edge.
    #[serde(default = "default_tf_cache_secs")]
    pub tf_cache_secs: f64,

    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceEntry>,
}

fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_world_frame() -> String {
    "world".to_string()
}
fn default_angle_topic() -> String {
    "/motor_controller/state".to_string()
}
fn default_max_z() -> f32 {
    spinscan_perception::crop::DEFAULT_MAX_Z
}
fn default_max_radius() -> f32 {
    spinscan_perception::crop::DEFAULT_MAX_RADIUS
}
fn default_transform_wait_secs() -> f64 {
    1.0
}
fn default_tf_cache_secs() -> f64 {
    spinscan_perception::transform::DEFAULT_CACHE_SECS
}
fn default_devices() -> Vec<DeviceEntry> {
    vec![
        DeviceEntry {
            id: 1,
            frame: "laser1".to_string(),
            scan_topic: "/laser/scan1".to_string(),
            cloud_topic: "/project_side".to_string(),
            proximity_check: true,
        },
        DeviceEntry {
            id: 2,
            frame: "laser2".to_string(),
            scan_topic: "/laser/scan2".to_string(),
            cloud_topic: "/project_top".to_string(),
            proximity_check: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rosbridge_url: default_rosbridge_url(),
            world_frame: default_world_frame(),
            angle_topic: default_angle_topic(),
            max_z: default_max_z(),
            max_radius: default_max_radius(),
            transform_wait_secs: default_transform_wait_secs(),
            tf_cache_secs: default_tf_cache_secs(),
            devices: default_devices(),
        }
    }
}

impl Config {
    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<(), SpinError> {
        let fail = |msg: String| Err(SpinError::Config(msg));
        if !(self.max_z.is_finite() && self.max_z >= 0.0) {
            return fail(format!("max_z must be a non-negative number, got {}", self.max_z));
        }
        if !(self.max_radius.is_finite() && self.max_radius > 0.0) {
            return fail(format!("max_radius must be positive, got {}", self.max_radius));
        }
        if !(self.transform_wait_secs > 0.0 && self.transform_wait_secs <= MAX_TRANSFORM_WAIT_SECS) {
            return fail(format!(
                "transform_wait_secs must be in (0, {MAX_TRANSFORM_WAIT_SECS}], got {}",
                self.transform_wait_secs
            ));
        }
        if !(self.tf_cache_secs.is_finite() && self.tf_cache_secs > 0.0) {
            return fail(format!("tf_cache_secs must be positive, got {}", self.tf_cache_secs));
        }
        if self.world_frame.trim_start_matches('/').is_empty() {
            return fail("world_frame must not be empty".to_string());
        }
        if self.devices.is_empty() {
            return fail("at least one device must be configured".to_string());
        }
        let mut topics = vec![self.angle_topic.trim_start_matches('/')];
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].iter().any(|d| d.id == device.id) {
                return fail(format!("device id {} is configured twice", device.id));
            }
            if device.frame.trim_start_matches('/').is_empty() {
                return fail(format!("device {} has an empty frame", device.id));
            }
            for topic in [&device.scan_topic, &device.cloud_topic] {
                let topic = topic.trim_start_matches('/');
                if topic.is_empty() || topics.contains(&topic) {
                    return fail(format!("device {} reuses or omits topic '{topic}'", device.id));
                }
                topics.push(topic);
            }
        }
        Ok(())
    }

    /// Runtime settings.  An out-of-range wait falls back to the default;
    /// [`validate`](Self::validate) rejects it first.
    pub fn fusion_settings(&self) -> FusionSettings {
        FusionSettings {
            world_frame: self.world_frame.clone(),
            crop: CropBounds {
                max_z: self.max_z,
                max_radius: self.max_radius,
            },
            transform_wait: Duration::try_from_secs_f64(self.transform_wait_secs)
                .unwrap_or(DEFAULT_TRANSFORM_WAIT),
        }
    }

    pub fn device_configs(&self) -> Vec<DeviceConfig> {
        self.devices
            .iter()
            .map(|d| DeviceConfig {
                id: DeviceId(d.id),
                frame: d.frame.clone(),
                proximity_check: d.proximity_check,
            })
            .collect()
    }

    pub fn routes(&self) -> RosbridgeRoutes {
        self.devices.iter().fold(
            RosbridgeRoutes::new().angle(&self.angle_topic).transforms(),
            |routes, d| {
                routes
                    .scan(DeviceId(d.id), &d.scan_topic)
                    .cloud(DeviceId(d.id), &d.cloud_topic)
            },
        )
    }
}

/// `$SPINSCAN_CONFIG` when set, otherwise `~/.spinscan/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SPINSCAN_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".spinscan").join("config.toml")
}

/// Load, override from the environment and validate.
pub fn load() -> Result<Config, SpinError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the config at `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SpinError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        SpinError::Config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| SpinError::Config(format!("Failed to parse config: {}", e)))?;
    Ok(Some(cfg))
}

/// Apply `SPINSCAN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SPINSCAN_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `SPINSCAN_MAX_Z` | `max_z` |
/// | `SPINSCAN_MAX_RADIUS` | `max_radius` |
/// | `SPINSCAN_TRANSFORM_WAIT_SECS` | `transform_wait_secs` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SPINSCAN_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Ok(v) = std::env::var("SPINSCAN_MAX_Z")
        && let Ok(max_z) = v.parse::<f32>()
    {
        cfg.max_z = max_z;
    }
    if let Ok(v) = std::env::var("SPINSCAN_MAX_RADIUS")
        && let Ok(max_radius) = v.parse::<f32>()
    {
        cfg.max_radius = max_radius;
    }
    if let Ok(v) = std::env::var("SPINSCAN_TRANSFORM_WAIT_SECS")
        && let Ok(secs) = v.parse::<f64>()
    {
        cfg.transform_wait_secs = secs;
    }
}
