//! CameraSource trait

use async_trait::async_trait;

use crate::{DeviceError, Frame, FrameShape};

/// A frame producer with fixed geometry
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Shape of every frame this source yields
    fn shape(&self) -> FrameShape;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<(), DeviceError>;

    /// Read the next frame; may wait on acquisition
    async fn read_frame(&mut self) -> Result<Frame, DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
