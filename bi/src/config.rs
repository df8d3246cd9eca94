//! Rig configuration types and loading

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use hardware::{ArmSettings, FrameShape};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::control::DEFAULT_FPS;
use crate::device::Side;

const CONFIG_FILE: &str = "bimanual.yml";

/// Main rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rig identity; arm ids derive from it (`<id>_left`)
    pub id: String,

    /// Shared calibration store
    #[serde(rename = "calibration-dir")]
    pub calibration_dir: PathBuf,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Follower arms and cameras
    pub follower: FollowerConfig,

    /// Leader arms used for teleoperation
    pub leader: LeaderConfig,

    /// Teleoperation loop
    pub control: ControlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: "bimanual_so101".to_string(),
            calibration_dir: default_calibration_dir(),
            log_level: None,
            follower: FollowerConfig::default(),
            leader: LeaderConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

fn default_calibration_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bimanual")
        .join("calibration")
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in default_locations() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Peek at `log-level` before logging is initialized; silent on any failure
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => default_locations().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    /// Check values serde cannot; call once after loading
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(eyre!("Rig id must not be empty"));
        }

        for (group, left, right) in [
            ("follower", &self.follower.left_arm, &self.follower.right_arm),
            ("leader", &self.leader.left_arm, &self.leader.right_arm),
        ] {
            if left.port == right.port {
                return Err(eyre!("{} arms share port {}", group, left.port));
            }
            for (side, arm) in [(Side::Left, left), (Side::Right, right)] {
                if let Some(limit) = arm.max_relative_target
                    && !(limit.is_finite() && limit > 0.0)
                {
                    return Err(eyre!("{} {} arm: max-relative-target must be positive", group, side));
                }
            }
        }

        for (name, camera) in self.follower.cameras.iter() {
            if name.trim().is_empty() {
                return Err(eyre!("Camera names must not be empty"));
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(eyre!("Camera '{}' has zero width or height", name));
            }
            if camera.fps == 0 {
                return Err(eyre!("Camera '{}' has zero fps", name));
            }
        }

        if self.control.fps == 0 {
            return Err(eyre!("control.fps must be at least 1"));
        }
        if let Some(secs) = self.control.duration_s {
            duration_from_secs(secs).context("Invalid control.duration-s")?;
        }
        Ok(())
    }

    /// Settings for one follower arm; id is `<id>_<side>`
    pub fn follower_arm_settings(&self, side: Side) -> ArmSettings {
        self.follower
            .arm(side)
            .settings(format!("{}_{}", self.id, side), &self.calibration_dir)
    }

    /// Leader pair id, `<id>_leader` unless set
    pub fn leader_id(&self) -> String {
        self.leader
            .id
            .clone()
            .unwrap_or_else(|| format!("{}_leader", self.id))
    }

    pub fn leader_arm_settings(&self, side: Side) -> ArmSettings {
        self.leader
            .arm(side)
            .settings(format!("{}_{}", self.leader_id(), side), &self.calibration_dir)
    }
}

/// `./bimanual.yml`, then `<config_dir>/bimanual/bimanual.yml`
fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(config_dir) = dirs::config_dir() {
        locations.push(config_dir.join("bimanual").join(CONFIG_FILE));
    }
    locations
}

/// Follower pair and its cameras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerConfig {
    #[serde(rename = "left-arm")]
    pub left_arm: ArmConfig,

    #[serde(rename = "right-arm")]
    pub right_arm: ArmConfig,

    /// Cameras by name, in document order
    pub cameras: CameraSet,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            left_arm: ArmConfig::on_port("/dev/ttyACM0"),
            right_arm: ArmConfig::on_port("/dev/ttyACM1"),
            cameras: CameraSet::default(),
        }
    }
}

impl FollowerConfig {
    pub fn arm(&self, side: Side) -> &ArmConfig {
        match side {
            Side::Left => &self.left_arm,
            Side::Right => &self.right_arm,
        }
    }
}

/// Leader pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    /// Defaults to `<rig id>_leader`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "left-arm")]
    pub left_arm: ArmConfig,

    #[serde(rename = "right-arm")]
    pub right_arm: ArmConfig,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            id: None,
            left_arm: ArmConfig::on_port("/dev/ttyACM2"),
            right_arm: ArmConfig::on_port("/dev/ttyACM3"),
        }
    }
}

impl LeaderConfig {
    pub fn arm(&self, side: Side) -> &ArmConfig {
        match side {
            Side::Left => &self.left_arm,
            Side::Right => &self.right_arm,
        }
    }
}

/// Arm driver backing a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmDriver {
    #[default]
    So101,
    Sim,
}

/// One arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// Serial port of the motor bus
    pub port: String,

    pub driver: ArmDriver,

    #[serde(rename = "disable-torque-on-disconnect")]
    pub disable_torque_on_disconnect: bool,

    /// Per-step clamp on goal distance from the present position
    #[serde(rename = "max-relative-target", skip_serializing_if = "Option::is_none")]
    pub max_relative_target: Option<f64>,

    #[serde(rename = "use-degrees")]
    pub use_degrees: bool,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self::on_port("/dev/ttyACM0")
    }
}

impl ArmConfig {
    pub fn on_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            driver: ArmDriver::default(),
            disable_torque_on_disconnect: true,
            max_relative_target: None,
            use_degrees: false,
        }
    }

    fn settings(&self, id: String, calibration_dir: &Path) -> ArmSettings {
        ArmSettings {
            id: Some(id),
            port: self.port.clone(),
            calibration_dir: calibration_dir.to_path_buf(),
            disable_torque_on_disconnect: self.disable_torque_on_disconnect,
            max_relative_target: self.max_relative_target,
            use_degrees: self.use_degrees,
        }
    }
}

/// Camera backend and its selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CameraDriver {
    Opencv {
        #[serde(rename = "index-or-path")]
        index_or_path: CameraIndex,
    },
    Realsense {
        #[serde(rename = "serial-number", default, skip_serializing_if = "Option::is_none")]
        serial_number: Option<String>,
    },
    Sim,
}

/// Device index (`0`) or device path (`/dev/video2`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraIndex {
    Index(u32),
    Path(PathBuf),
}

/// One camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(flatten)]
    pub driver: CameraDriver,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraConfig {
    pub fn sim(width: u32, height: u32, fps: u32) -> Self {
        Self {
            driver: CameraDriver::Sim,
            width,
            height,
            fps,
        }
    }

    /// RGB frame geometry
    pub fn shape(&self) -> FrameShape {
        FrameShape::rgb(self.height, self.width)
    }
}

/// Named cameras in configuration order
///
/// Serialized as a YAML mapping; order is significant because it fixes the
/// observation schema order, so duplicate names are rejected on load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSet(Vec<(String, CameraConfig)>);

impl CameraSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a camera; a duplicate name is an error
    pub fn insert(&mut self, name: impl Into<String>, camera: CameraConfig) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(eyre!("Duplicate camera name '{}'", name));
        }
        self.0.push((name, camera));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CameraConfig> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CameraConfig)> {
        self.0.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CameraSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, camera) in &self.0 {
            map.serialize_entry(name, camera)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CameraSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CameraSetVisitor;

        impl<'de> Visitor<'de> for CameraSetVisitor {
            type Value = CameraSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of camera name to camera config")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<CameraSet, E> {
                Ok(CameraSet::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<CameraSet, A::Error> {
                let mut seen = HashSet::new();
                let mut cameras = Vec::new();
                while let Some((name, camera)) = access.next_entry::<String, CameraConfig>()? {
                    if !seen.insert(name.clone()) {
                        return Err(serde::de::Error::custom(format!("duplicate camera name '{}'", name)));
                    }
                    cameras.push((name, camera));
                }
                Ok(CameraSet(cameras))
            }
        }

        deserializer.deserialize_map(CameraSetVisitor)
    }
}

/// Teleoperation loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Loop rate in Hz
    pub fps: u32,

    /// Stop after this many seconds; unbounded when unset
    #[serde(rename = "duration-s", skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            duration_s: None,
        }
    }
}

/// Convert a user-supplied run length; rejects zero, negative, non-finite
/// and values too large for `Duration`
pub fn duration_from_secs(secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(eyre!("Duration must be positive, got {}", secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| eyre!("Duration of {} seconds is out of range: {}", secs, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.id, "bimanual_so101");
        assert_eq!(config.follower.left_arm.port, "/dev/ttyACM0");
        assert_eq!(config.leader.right_arm.port, "/dev/ttyACM3");
        assert!(config.follower.cameras.is_empty());
        assert_eq!(config.control.fps, 10);
        assert!(config.calibration_dir.ends_with("bimanual/calibration"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
id: lab_rig
calibration-dir: /tmp/calib
log-level: debug

follower:
  left-arm:
    port: /dev/ttyUSB0
    driver: sim
    max-relative-target: 5.0
  right-arm:
    port: /dev/ttyUSB1
    disable-torque-on-disconnect: false
    use-degrees: true
  cameras:
    top:
      type: opencv
      index-or-path: 2
      width: 640
      height: 480
      fps: 30
    wrist:
      type: realsense
      serial-number: "0123456789"
      width: 320
      height: 240
      fps: 15
    bench:
      type: sim
      width: 8
      height: 4
      fps: 10

leader:
  id: lab_leader

control:
  fps: 30
  duration-s: 12.5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.id, "lab_rig");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.follower.left_arm.driver, ArmDriver::Sim);
        assert_eq!(config.follower.left_arm.max_relative_target, Some(5.0));
        assert!(!config.follower.right_arm.disable_torque_on_disconnect);
        assert!(config.follower.right_arm.use_degrees);

        let names: Vec<&str> = config.follower.cameras.names().collect();
        assert_eq!(names, vec!["top", "wrist", "bench"]);
        assert_eq!(
            config.follower.cameras.get("top").unwrap().driver,
            CameraDriver::Opencv {
                index_or_path: CameraIndex::Index(2)
            }
        );
        assert_eq!(config.follower.cameras.get("bench").unwrap().shape(), FrameShape::rgb(4, 8));
        assert_eq!(config.leader_id(), "lab_leader");
        assert_eq!(config.control.duration_s, Some(12.5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
follower:
  right-arm:
    port: /dev/ttyUSB9
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.follower.right_arm.port, "/dev/ttyUSB9");
        assert_eq!(config.follower.left_arm.port, "/dev/ttyACM0");
        assert!(config.follower.right_arm.disable_torque_on_disconnect);
        assert_eq!(config.id, "bimanual_so101");
    }

    #[test]
    fn test_camera_path_selector() {
        let yaml = r#"
type: opencv
index-or-path: /dev/video4
width: 640
height: 480
fps: 30
"#;
        let camera: CameraConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            camera.driver,
            CameraDriver::Opencv {
                index_or_path: CameraIndex::Path(PathBuf::from("/dev/video4"))
            }
        );
    }

    #[test]
    fn test_duplicate_camera_rejected() {
        let mut cameras = CameraSet::new();
        cameras.insert("top", CameraConfig::sim(4, 4, 10)).unwrap();
        assert!(cameras.insert("top", CameraConfig::sim(4, 4, 10)).is_err());
        assert_eq!(cameras.len(), 1);
    }

    #[test]
    fn test_derived_ids() {
        let mut config = Config::default();
        config.id = "rig".to_string();

        assert_eq!(config.follower_arm_settings(Side::Left).device_id(), "rig_left");
        assert_eq!(config.leader_id(), "rig_leader");
        assert_eq!(config.leader_arm_settings(Side::Right).device_id(), "rig_leader_right");
        assert_eq!(config.leader_arm_settings(Side::Right).port, "/dev/ttyACM3");
    }

    #[test]
    fn test_validate_rejects_shared_port() {
        let mut config = Config::default();
        config.follower.right_arm.port = config.follower.left_arm.port.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.follower.left_arm.max_relative_target = Some(-1.0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.follower.cameras.insert("top", CameraConfig::sim(0, 4, 10)).unwrap();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.control.fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_duration() {
        let mut config = Config::default();
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY, 1.0e20, 1.0e25] {
            config.control.duration_s = Some(secs);
            assert!(config.validate().is_err(), "duration-s {} should be rejected", secs);
        }

        config.control.duration_s = Some(12.5);
        config.validate().unwrap();
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(0.25).unwrap(), Duration::from_millis(250));

        let err = duration_from_secs(1.0e20).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let err = duration_from_secs(-3.0).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_load_from_file_and_log_level() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bimanual.yml");
        fs::write(&path, "id: from_file\nlog-level: warn\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.id, "from_file");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));

        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }
}
