//! Simulated camera

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{SimOp, SimProbe};
use crate::{CameraSource, DeviceError, Frame, FrameShape};

/// Camera producing a moving gradient, paced at its frame rate
pub struct SimCamera {
    name: String,
    shape: FrameShape,
    frame_interval: Option<Duration>,
    next_frame_at: Option<Instant>,
    frame_index: u64,
    probe: SimProbe,
}

impl SimCamera {
    /// `fps` of zero disables pacing
    pub fn new(name: impl Into<String>, shape: FrameShape, fps: u32) -> Self {
        let frame_interval = (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64));
        Self {
            name: name.into(),
            shape,
            frame_interval,
            next_frame_at: None,
            frame_index: 0,
            probe: SimProbe::new(),
        }
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn fault(&self, op: SimOp) -> DeviceError {
        DeviceError::Frame {
            device: self.name.clone(),
            message: format!("simulated {} fault", op),
        }
    }

    fn render(&self) -> Result<Frame, DeviceError> {
        let width = self.shape.width as usize;
        let channels = self.shape.channels as usize;
        let shift = self.frame_index as usize;

        let data = (0..self.shape.byte_len())
            .map(|i| {
                let pixel = i / channels;
                let (row, col) = (pixel / width, pixel % width);
                ((row + col + shift) % 256) as u8
            })
            .collect();

        Frame::new(self.shape, data)
    }
}

#[async_trait]
impl CameraSource for SimCamera {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn is_connected(&self) -> bool {
        self.probe.is_connected()
    }

    async fn connect(&mut self) -> Result<(), DeviceError> {
        debug!(name = %self.name, "SimCamera::connect: called");
        if self.probe.record(SimOp::Connect) {
            return Err(self.fault(SimOp::Connect));
        }
        if self.probe.is_connected() {
            return Err(DeviceError::AlreadyConnected {
                device: self.name.clone(),
            });
        }
        self.probe.set_connected(true);
        self.next_frame_at = None;
        info!(name = %self.name, shape = %self.shape, "camera connected");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.probe.record(SimOp::ReadFrame) {
            return Err(self.fault(SimOp::ReadFrame));
        }
        if !self.probe.is_connected() {
            return Err(DeviceError::NotConnected {
                device: self.name.clone(),
            });
        }

        if let Some(interval) = self.frame_interval {
            let now = Instant::now();
            match self.next_frame_at {
                Some(due) if due > now => tokio::time::sleep_until(due).await,
                _ => {}
            }
            self.next_frame_at = Some(Instant::now() + interval);
        }

        let frame = self.render()?;
        self.frame_index += 1;
        Ok(frame)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        debug!(name = %self.name, "SimCamera::disconnect: called");
        if self.probe.record(SimOp::Disconnect) {
            return Err(self.fault(SimOp::Disconnect));
        }
        if !self.probe.is_connected() {
            return Err(DeviceError::NotConnected {
                device: self.name.clone(),
            });
        }
        self.probe.set_connected(false);
        info!(name = %self.name, "camera disconnected");
        Ok(())
    }
}
