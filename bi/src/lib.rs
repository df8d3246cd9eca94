//! Bimanual - two arms, many cameras, one device
//!
//! Presents a pair of follower arms plus a set of cameras as a single robot
//! with one lifecycle and one namespaced observation/action schema, and runs
//! the guided calibration of a full leader/follower rig.
//!
//! # Core Concepts
//!
//! - **Namespaced channels**: arm channels gain a `left_`/`right_` prefix at
//!   the coordinator boundary; cameras appear as `observation.images.<name>`
//! - **Derived state**: connection and calibration are read from sub-devices,
//!   never mirrored
//! - **Explicit failure policy**: setup is fail-fast, teardown is fail-soft
//!
//! # Modules
//!
//! - [`follower`] - `BimanualFollower`, the coordinator
//! - [`leader`] - `BimanualLeader`, the teleoperator pair
//! - [`calibration`] - four-arm calibration state machine
//! - [`lifecycle`] - ordered step runner with fail-fast/fail-soft policies
//! - [`control`] - fixed-rate teleoperation loop
//! - [`config`] - configuration types and loading
//! - [`factory`] - device construction from configuration
//! - [`cli`] - command-line interface

pub mod calibration;
pub mod cli;
pub mod config;
pub mod control;
pub mod device;
mod error;
pub mod factory;
pub mod features;
pub mod follower;
pub mod leader;
pub mod lifecycle;
pub mod operator;
pub mod pair;

pub use calibration::{CalibrationFailure, CalibrationReport, CalibrationSequencer, CalibrationState, SequencerError};
pub use config::Config;
pub use control::ControlLoop;
pub use device::{ArmGroup, ArmRole, DeviceId, Side};
pub use error::CoordinatorError;
pub use features::{FeatureType, Features, Observation, ObservationValue};
pub use follower::BimanualFollower;
pub use leader::BimanualLeader;
