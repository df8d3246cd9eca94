//! Device error types

use thiserror::Error;

/// Errors raised by a single sub-device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{device} is not connected")]
    NotConnected { device: String },

    #[error("{device} is already connected")]
    AlreadyConnected { device: String },

    #[error("Bus error on {port}: {message}")]
    Bus { port: String, message: String },

    #[error("Unknown motor '{motor}' on {device}")]
    UnknownMotor { device: String, motor: String },

    #[error("{device} has {count} motors, bus ids stop at 255")]
    TooManyMotors { device: String, count: usize },

    #[error("Frame acquisition failed on {device}: {message}")]
    Frame { device: String, message: String },

    #[error("Frame buffer holds {actual} bytes, shape needs {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Calibration file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration format error: {0}")]
    Json(#[from] serde_json::Error),
}
