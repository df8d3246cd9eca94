//! Device construction from configuration
//!
//! Real bus and camera drivers live outside this crate and plug in through
//! [`DeviceFactory`]. The shipped [`SimFactory`] builds simulated devices.

use hardware::sim::{SimArm, SimCamera};
use hardware::{ArmController, ArmSettings, CameraSource};
use thiserror::Error;
use tracing::debug;

use crate::calibration::CalibrationSequencer;
use crate::config::{ArmConfig, ArmDriver, CameraConfig, CameraDriver, Config};
use crate::device::Side;
use crate::error::CoordinatorError;
use crate::follower::{BimanualFollower, TorqueOnDisconnect};
use crate::leader::BimanualLeader;
use crate::operator::Operator;
use crate::pair::ArmPair;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("No driver available for {device} ({driver}); run with --simulate or configure a sim driver")]
    Unsupported { device: String, driver: String },

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Builds sub-devices from their configuration records
pub trait DeviceFactory {
    fn arm(&self, config: &ArmConfig, settings: ArmSettings) -> Result<Box<dyn ArmController>, FactoryError>;

    fn camera(&self, name: &str, config: &CameraConfig) -> Result<Box<dyn CameraSource>, FactoryError>;
}

/// Builds devices configured with the `sim` driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SimFactory {
    simulate_all: bool,
}

impl SimFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate every device whatever driver it names
    pub fn simulate_all() -> Self {
        Self { simulate_all: true }
    }
}

impl DeviceFactory for SimFactory {
    fn arm(&self, config: &ArmConfig, settings: ArmSettings) -> Result<Box<dyn ArmController>, FactoryError> {
        debug!(port = %config.port, driver = ?config.driver, "SimFactory::arm: called");
        match config.driver {
            ArmDriver::Sim => Ok(Box::new(SimArm::so101(settings))),
            _ if self.simulate_all => Ok(Box::new(SimArm::so101(settings))),
            ArmDriver::So101 => Err(FactoryError::Unsupported {
                device: settings.device_id(),
                driver: "so101".to_string(),
            }),
        }
    }

    fn camera(&self, name: &str, config: &CameraConfig) -> Result<Box<dyn CameraSource>, FactoryError> {
        debug!(%name, "SimFactory::camera: called");
        let driver = match &config.driver {
            CameraDriver::Sim => None,
            _ if self.simulate_all => None,
            CameraDriver::Opencv { .. } => Some("opencv"),
            CameraDriver::Realsense { .. } => Some("realsense"),
        };
        match driver {
            None => Ok(Box::new(SimCamera::new(name, config.shape(), config.fps))),
            Some(driver) => Err(FactoryError::Unsupported {
                device: format!("camera:{}", name),
                driver: driver.to_string(),
            }),
        }
    }
}

fn follower_pair(config: &Config, factory: &dyn DeviceFactory) -> Result<ArmPair, FactoryError> {
    Ok(ArmPair::new(
        factory.arm(&config.follower.left_arm, config.follower_arm_settings(Side::Left))?,
        factory.arm(&config.follower.right_arm, config.follower_arm_settings(Side::Right))?,
    ))
}

fn leader_pair(config: &Config, factory: &dyn DeviceFactory) -> Result<ArmPair, FactoryError> {
    Ok(ArmPair::new(
        factory.arm(&config.leader.left_arm, config.leader_arm_settings(Side::Left))?,
        factory.arm(&config.leader.right_arm, config.leader_arm_settings(Side::Right))?,
    ))
}

pub fn build_follower(config: &Config, factory: &dyn DeviceFactory) -> Result<BimanualFollower, FactoryError> {
    let left = factory.arm(&config.follower.left_arm, config.follower_arm_settings(Side::Left))?;
    let right = factory.arm(&config.follower.right_arm, config.follower_arm_settings(Side::Right))?;

    let mut cameras = Vec::with_capacity(config.follower.cameras.len());
    for (name, camera) in config.follower.cameras.iter() {
        cameras.push((name.to_string(), factory.camera(name, camera)?));
    }

    let torque = TorqueOnDisconnect {
        left: config.follower.left_arm.disable_torque_on_disconnect,
        right: config.follower.right_arm.disable_torque_on_disconnect,
    };
    Ok(BimanualFollower::new(config.id.clone(), left, right, cameras)?.with_torque_on_disconnect(torque))
}

pub fn build_leader(config: &Config, factory: &dyn DeviceFactory) -> Result<BimanualLeader, FactoryError> {
    let left = factory.arm(&config.leader.left_arm, config.leader_arm_settings(Side::Left))?;
    let right = factory.arm(&config.leader.right_arm, config.leader_arm_settings(Side::Right))?;
    Ok(BimanualLeader::new(config.leader_id(), left, right)?)
}

pub fn build_sequencer<O: Operator>(
    config: &Config,
    factory: &dyn DeviceFactory,
    operator: O,
) -> Result<CalibrationSequencer<O>, FactoryError> {
    Ok(CalibrationSequencer::new(
        follower_pair(config, factory)?,
        leader_pair(config, factory)?,
        operator,
    ))
}
