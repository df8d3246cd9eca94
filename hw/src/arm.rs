//! ArmController trait and per-arm settings

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{DeviceError, MotorMap};

/// Settings for a single arm, fixed at construction
///
/// Calibration artifacts are read from and written to `calibration_dir` by the
/// arm itself, keyed by [`ArmSettings::device_id`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArmSettings {
    /// Stable identity used for calibration artifacts (`rig_left`)
    pub id: Option<String>,

    /// Serial port of the motor bus
    pub port: String,

    /// Shared calibration store location
    pub calibration_dir: PathBuf,

    /// Disable motor torque when disconnecting
    pub disable_torque_on_disconnect: bool,

    /// Per-step clamp on goal distance from the present position
    pub max_relative_target: Option<f64>,

    /// Report and accept positions in degrees instead of normalized units
    pub use_degrees: bool,
}

impl ArmSettings {
    pub fn new(port: impl Into<String>, calibration_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            port: port.into(),
            calibration_dir: calibration_dir.into(),
            disable_torque_on_disconnect: true,
            max_relative_target: None,
            use_degrees: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_relative_target(mut self, limit: f64) -> Self {
        self.max_relative_target = Some(limit);
        self
    }

    /// Identity used in logs and calibration file names, falling back to the port
    pub fn device_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.port.clone())
    }
}

/// A single robot arm on its own motor bus
///
/// Implementations own their connection and calibration state; callers read it
/// through [`is_connected`](ArmController::is_connected) and
/// [`is_calibrated`](ArmController::is_calibrated) and never mirror it.
///
/// Observation and action maps are keyed by channel (`elbow_flex.pos`). Keys
/// ending in [`POS_SUFFIX`](crate::POS_SUFFIX) are commandable positions.
#[async_trait]
pub trait ArmController: Send + Sync {
    /// Identity for logs and calibration artifacts
    fn id(&self) -> &str;

    /// Motor names on this arm, in bus order
    fn motors(&self) -> &[String];

    fn is_connected(&self) -> bool;

    fn is_calibrated(&self) -> bool;

    /// Open the bus; when `calibrate` is set and no calibration is stored, run it
    async fn connect(&mut self, calibrate: bool) -> Result<(), DeviceError>;

    /// Record joint ranges and homing offsets and persist them
    async fn calibrate(&mut self) -> Result<(), DeviceError>;

    /// Apply operating-mode registers; safe to repeat
    async fn configure(&mut self) -> Result<(), DeviceError>;

    /// Assign bus ids and baudrate to each motor
    async fn setup_motors(&mut self) -> Result<(), DeviceError>;

    /// Read present state for every channel
    async fn get_observation(&mut self) -> Result<MotorMap, DeviceError>;

    /// Command goal positions; returns the values actually applied after clamping
    async fn send_action(&mut self, action: MotorMap) -> Result<MotorMap, DeviceError>;

    async fn disable_torque(&mut self) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
