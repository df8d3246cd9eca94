//! Simulated arm

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{SimOp, SimProbe};
use crate::safety::ensure_safe_goal_position;
use crate::{ArmController, ArmSettings, DeviceError, MotorMap, POS_SUFFIX, position_key};

/// Motor names of an SO-101 arm, in bus order
pub const SO101_MOTORS: [&str; 6] = [
    "shoulder_pan",
    "shoulder_lift",
    "elbow_flex",
    "wrist_flex",
    "wrist_roll",
    "gripper",
];

/// Encoder resolution of the simulated servos
const ENCODER_MAX: i32 = 4095;

/// Per-motor calibration record, persisted as JSON keyed by motor name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCalibration {
    pub id: u8,
    pub drive_mode: u8,
    pub homing_offset: i32,
    pub range_min: i32,
    pub range_max: i32,
}

/// In-memory arm that follows commands instantly
pub struct SimArm {
    id: String,
    settings: ArmSettings,
    motors: Vec<String>,
    positions: MotorMap,
    calibration: Option<BTreeMap<String, MotorCalibration>>,
    torque_enabled: bool,
    probe: SimProbe,
}

impl SimArm {
    pub fn new(settings: ArmSettings, motors: Vec<String>) -> Self {
        let positions = motors.iter().map(|m| (m.clone(), 0.0)).collect();
        Self {
            id: settings.device_id(),
            settings,
            motors,
            positions,
            calibration: None,
            torque_enabled: false,
            probe: SimProbe::new(),
        }
    }

    /// Arm with the SO-101 motor set
    pub fn so101(settings: ArmSettings) -> Self {
        Self::new(settings, SO101_MOTORS.iter().map(|m| m.to_string()).collect())
    }

    /// Handle for inspecting calls and injecting faults after the arm is moved
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    pub fn torque_enabled(&self) -> bool {
        self.torque_enabled
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.settings
            .calibration_dir
            .join(format!("{}.json", self.id.replace('/', "_")))
    }

    fn fault(&self, op: SimOp) -> DeviceError {
        DeviceError::Bus {
            port: self.settings.port.clone(),
            message: format!("simulated {} fault", op),
        }
    }

    /// Bus ids start at 1 and must fit a `u8`
    fn bus_id(&self, idx: usize) -> Result<u8, DeviceError> {
        u8::try_from(idx + 1).map_err(|_| DeviceError::TooManyMotors {
            device: self.id.clone(),
            count: self.motors.len(),
        })
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.probe.is_connected() {
            Ok(())
        } else {
            Err(DeviceError::NotConnected { device: self.id.clone() })
        }
    }

    fn bounds(&self, motor: &str) -> (f64, f64) {
        match (motor, self.settings.use_degrees) {
            ("gripper", _) => (0.0, 100.0),
            (_, true) => (-180.0, 180.0),
            (_, false) => (-100.0, 100.0),
        }
    }

    async fn load_calibration(&self) -> Result<Option<BTreeMap<String, MotorCalibration>>, DeviceError> {
        let path = self.calibration_path();
        if !tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "SimArm::load_calibration: no calibration file");
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let calibration = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "SimArm::load_calibration: loaded");
        Ok(Some(calibration))
    }

    async fn write_calibration(&mut self) -> Result<(), DeviceError> {
        let calibration = self
            .motors
            .iter()
            .enumerate()
            .map(|(idx, motor)| {
                let record = MotorCalibration {
                    id: self.bus_id(idx)?,
                    drive_mode: 0,
                    homing_offset: 0,
                    range_min: 0,
                    range_max: ENCODER_MAX,
                };
                Ok((motor.clone(), record))
            })
            .collect::<Result<BTreeMap<String, MotorCalibration>, DeviceError>>()?;

        let path = self.calibration_path();
        tokio::fs::create_dir_all(&self.settings.calibration_dir).await?;
        tokio::fs::write(&path, serde_json::to_string_pretty(&calibration)?).await?;
        info!(id = %self.id, path = %path.display(), "Calibration saved");

        self.calibration = Some(calibration);
        Ok(())
    }
}

#[async_trait]
impl ArmController for SimArm {
    fn id(&self) -> &str {
        &self.id
    }

    fn motors(&self) -> &[String] {
        &self.motors
    }

    fn is_connected(&self) -> bool {
        self.probe.is_connected()
    }

    fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    async fn connect(&mut self, calibrate: bool) -> Result<(), DeviceError> {
        debug!(id = %self.id, calibrate, "SimArm::connect: called");
        if self.probe.record(SimOp::Connect) {
            return Err(self.fault(SimOp::Connect));
        }
        if self.probe.is_connected() {
            return Err(DeviceError::AlreadyConnected { device: self.id.clone() });
        }
        self.probe.set_connected(true);

        self.calibration = self.load_calibration().await?;
        if self.calibration.is_none() && calibrate {
            info!(id = %self.id, "No calibration file found, running calibration");
            self.write_calibration().await?;
        }
        self.torque_enabled = true;

        info!(id = %self.id, port = %self.settings.port, "connected");
        Ok(())
    }

    async fn calibrate(&mut self) -> Result<(), DeviceError> {
        debug!(id = %self.id, "SimArm::calibrate: called");
        if self.probe.record(SimOp::Calibrate) {
            return Err(self.fault(SimOp::Calibrate));
        }
        self.ensure_connected()?;
        self.write_calibration().await
    }

    async fn configure(&mut self) -> Result<(), DeviceError> {
        debug!(id = %self.id, "SimArm::configure: called");
        if self.probe.record(SimOp::Configure) {
            return Err(self.fault(SimOp::Configure));
        }
        self.ensure_connected()?;
        self.torque_enabled = true;
        Ok(())
    }

    async fn setup_motors(&mut self) -> Result<(), DeviceError> {
        debug!(id = %self.id, "SimArm::setup_motors: called");
        if self.probe.record(SimOp::SetupMotors) {
            return Err(self.fault(SimOp::SetupMotors));
        }
        for (idx, motor) in self.motors.iter().enumerate() {
            let bus_id = self.bus_id(idx)?;
            info!(id = %self.id, %motor, bus_id, "motor id set");
        }
        Ok(())
    }

    async fn get_observation(&mut self) -> Result<MotorMap, DeviceError> {
        if self.probe.record(SimOp::GetObservation) {
            return Err(self.fault(SimOp::GetObservation));
        }
        self.ensure_connected()?;

        let mut state = MotorMap::new();
        for (motor, position) in &self.positions {
            state.insert(position_key(motor), *position);
            state.insert(format!("{}.load", motor), 0.0);
        }
        Ok(state)
    }

    async fn send_action(&mut self, action: MotorMap) -> Result<MotorMap, DeviceError> {
        debug!(id = %self.id, channel_count = action.len(), "SimArm::send_action: called");
        if self.probe.record(SimOp::SendAction) {
            return Err(self.fault(SimOp::SendAction));
        }
        self.ensure_connected()?;

        let mut goals = MotorMap::new();
        for (key, value) in action {
            let Some(motor) = key.strip_suffix(POS_SUFFIX) else {
                continue;
            };
            if !self.positions.contains_key(motor) {
                return Err(DeviceError::UnknownMotor {
                    device: self.id.clone(),
                    motor: motor.to_string(),
                });
            }
            goals.insert(motor.to_string(), value);
        }

        if let Some(limit) = self.settings.max_relative_target {
            goals = ensure_safe_goal_position(&self.id, &goals, &self.positions, limit)?;
        }

        let mut applied = MotorMap::new();
        for (motor, goal) in goals {
            let (low, high) = self.bounds(&motor);
            let value = goal.clamp(low, high);
            applied.insert(position_key(&motor), value);
            self.positions.insert(motor, value);
        }
        Ok(applied)
    }

    async fn disable_torque(&mut self) -> Result<(), DeviceError> {
        debug!(id = %self.id, "SimArm::disable_torque: called");
        if self.probe.record(SimOp::DisableTorque) {
            return Err(self.fault(SimOp::DisableTorque));
        }
        self.ensure_connected()?;
        self.torque_enabled = false;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        debug!(id = %self.id, "SimArm::disconnect: called");
        if self.probe.record(SimOp::Disconnect) {
            return Err(self.fault(SimOp::Disconnect));
        }
        self.ensure_connected()?;
        if self.settings.disable_torque_on_disconnect {
            self.torque_enabled = false;
        }
        self.probe.set_connected(false);
        info!(id = %self.id, "disconnected");
        Ok(())
    }
}
