//! Left/right arm pair
//!
//! Shared by the follower coordinator, the leader teleoperator and the
//! calibration sequencer.

use hardware::{ArmController, MotorMap, is_position_key};
use tracing::debug;

use crate::device::Side;
use crate::features::{Features, merge_side, motor_features, namespaced, split_action};
use crate::lifecycle::{DeviceFailure, Step};

pub struct ArmPair {
    left: Box<dyn ArmController>,
    right: Box<dyn ArmController>,
}

impl ArmPair {
    pub fn new(left: Box<dyn ArmController>, right: Box<dyn ArmController>) -> Self {
        Self { left, right }
    }

    pub fn arm(&self, side: Side) -> &dyn ArmController {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    pub fn arm_mut(&mut self, side: Side) -> &mut dyn ArmController {
        match side {
            Side::Left => self.left.as_mut(),
            Side::Right => self.right.as_mut(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.left.is_connected() && self.right.is_connected()
    }

    pub fn is_calibrated(&self) -> bool {
        self.left.is_calibrated() && self.right.is_calibrated()
    }

    /// Left then right, each labelled by `label`
    pub fn steps<L>(&mut self, label: impl Fn(Side) -> L) -> Vec<Step<'_, L>> {
        vec![
            Step::arm(label(Side::Left), self.left.as_mut()),
            Step::arm(label(Side::Right), self.right.as_mut()),
        ]
    }

    /// Reject native channels that would collide with the side namespace
    pub fn check_channels(&self) -> Result<(), String> {
        for side in Side::BOTH {
            let arm = self.arm(side);
            for motor in arm.motors() {
                if Side::BOTH.iter().any(|s| motor.starts_with(s.prefix())) {
                    return Err(format!(
                        "motor '{}' on {} arm '{}' uses a reserved side prefix",
                        motor,
                        side,
                        arm.id()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Position features for both arms, left motors first
    pub fn motor_features(&self) -> Features {
        let mut features = Features::new();
        for side in Side::BOTH {
            features.extend(motor_features(side, self.arm(side).motors()));
        }
        features
    }

    /// Read both arms and keep position channels, namespaced
    pub async fn read_positions(&mut self) -> Result<MotorMap, DeviceFailure<Side>> {
        let mut merged = MotorMap::new();
        for side in Side::BOTH {
            let state = self
                .arm_mut(side)
                .get_observation()
                .await
                .map_err(|error| DeviceFailure { device: side, error })?;

            merged.extend(
                state
                    .into_iter()
                    .filter(|(key, _)| is_position_key(key))
                    .map(|(key, value)| (namespaced(side, &key), value)),
            );
        }
        Ok(merged)
    }

    /// Split a merged action by side and forward each non-empty half
    ///
    /// Returns the namespaced values the arms actually applied. A side with no
    /// keys in `action` is not called.
    pub async fn route_action(&mut self, action: &MotorMap) -> Result<MotorMap, DeviceFailure<Side>> {
        let split = split_action(action);
        if !split.unrouted.is_empty() {
            debug!(keys = ?split.unrouted, "ArmPair::route_action: ignoring unprefixed keys");
        }

        let mut sent = MotorMap::new();
        for side in Side::BOTH {
            let half = split.side(side);
            if half.is_empty() {
                continue;
            }
            let applied = self
                .arm_mut(side)
                .send_action(half.clone())
                .await
                .map_err(|error| DeviceFailure { device: side, error })?;
            merge_side(side, applied, &mut sent);
        }
        Ok(sent)
    }
}
