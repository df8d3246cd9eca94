//! Simulated sub-devices
//!
//! `SimArm` and `SimCamera` honour the full device contracts without hardware.
//! Each carries a [`SimProbe`], a cloneable handle that stays with the caller
//! after the device itself has been moved into a coordinator.

mod arm;
mod camera;
mod probe;

pub use arm::{MotorCalibration, SO101_MOTORS, SimArm};
pub use camera::SimCamera;
pub use probe::{SimOp, SimProbe};
