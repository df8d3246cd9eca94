//! Value types exchanged with sub-devices

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DeviceError;

/// Suffix marking a commandable position channel (`shoulder_pan.pos`)
pub const POS_SUFFIX: &str = ".pos";

/// Channel name -> value, as produced and consumed by a single arm
pub type MotorMap = BTreeMap<String, f64>;

/// Build the position channel key for a motor
pub fn position_key(motor: &str) -> String {
    format!("{}{}", motor, POS_SUFFIX)
}

/// Whether a channel key denotes a commandable position
pub fn is_position_key(key: &str) -> bool {
    key.ends_with(POS_SUFFIX)
}

/// Fixed frame geometry, known at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameShape {
    /// Three-channel colour frame
    pub fn rgb(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }

    /// Number of bytes in one frame buffer
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

impl std::fmt::Display for FrameShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// One image buffer, row-major HWC, one byte per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    shape: FrameShape,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a buffer, checking it matches the shape
    pub fn new(shape: FrameShape, data: Vec<u8>) -> Result<Self, DeviceError> {
        if data.len() != shape.byte_len() {
            return Err(DeviceError::FrameSize {
                expected: shape.byte_len(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
