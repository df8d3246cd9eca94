//! Hardware - sub-device contracts for arm/camera rigs
//!
//! Defines the capability contracts a rig coordinator consumes: one trait per
//! kind of physical sub-device, a shared error type, and the value types that
//! cross the boundary (motor maps, frames). Drivers live behind the traits;
//! this crate ships a simulated backend for dry runs and tests.
//!
//! # Modules
//!
//! - [`arm`] - `ArmController` trait and per-arm settings
//! - [`camera`] - `CameraSource` trait
//! - [`safety`] - max-relative-target goal clamping
//! - [`sim`] - simulated arm and camera with fault injection
//!
//! # Example
//!
//! ```ignore
//! use hardware::{ArmController, ArmSettings, sim::SimArm};
//!
//! let mut arm = SimArm::so101(ArmSettings::new("/dev/ttyACM0", "/tmp/calibration"));
//! arm.connect(false).await?;
//! let state = arm.get_observation().await?;
//! ```

pub mod arm;
pub mod camera;
mod error;
pub mod safety;
pub mod sim;
mod types;

pub use arm::{ArmController, ArmSettings};
pub use camera::CameraSource;
pub use error::DeviceError;
pub use types::{Frame, FrameShape, MotorMap, POS_SUFFIX, is_position_key, position_key};
