//! Coordinator error types

use hardware::DeviceError;
use thiserror::Error;

use crate::device::DeviceId;

/// Errors from coordinator-level operations
///
/// Variants carrying a `device` name the first sub-device that failed.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("{0} is already connected")]
    AlreadyConnected(String),

    #[error("Failed to connect {device}: {source}")]
    Connection { device: DeviceId, source: DeviceError },

    #[error("Failed to calibrate {device}: {source}")]
    Calibration { device: DeviceId, source: DeviceError },

    #[error("Failed to configure {device}: {source}")]
    Configuration { device: DeviceId, source: DeviceError },

    #[error("Motor setup failed on {device}: {source}")]
    Setup { device: DeviceId, source: DeviceError },

    #[error("Failed to read {device}: {source}")]
    Observation { device: DeviceId, source: DeviceError },

    #[error("Failed to command {device}: {source}")]
    Action { device: DeviceId, source: DeviceError },

    #[error("Malformed action: {0}")]
    ActionRouting(String),

    #[error("Invalid schema: {0}")]
    Schema(String),
}

impl CoordinatorError {
    /// The sub-device the error is attributed to, if any
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connection { device, .. }
            | Self::Calibration { device, .. }
            | Self::Configuration { device, .. }
            | Self::Setup { device, .. }
            | Self::Observation { device, .. }
            | Self::Action { device, .. } => Some(device),
            Self::NotConnected(_) | Self::AlreadyConnected(_) | Self::ActionRouting(_) | Self::Schema(_) => None,
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }
}
