//! Bimanual leader (teleoperator) pair
//!
//! The operator moves two leader arms by hand; their position readings,
//! namespaced by side, form the action for the follower.

use std::sync::OnceLock;

use hardware::{ArmController, MotorMap};
use tracing::{debug, info};

use crate::device::{DeviceId, Side};
use crate::error::CoordinatorError;
use crate::features::Features;
use crate::lifecycle::{LifecycleOp, Policy, run_steps};
use crate::pair::ArmPair;

pub struct BimanualLeader {
    id: String,
    arms: ArmPair,
    action_features: OnceLock<Features>,
}

impl BimanualLeader {
    pub fn new(
        id: impl Into<String>,
        left: Box<dyn ArmController>,
        right: Box<dyn ArmController>,
    ) -> Result<Self, CoordinatorError> {
        let arms = ArmPair::new(left, right);
        arms.check_channels().map_err(CoordinatorError::Schema)?;
        Ok(Self {
            id: id.into(),
            arms,
            action_features: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn arm(&self, side: Side) -> &dyn ArmController {
        self.arms.arm(side)
    }

    pub fn is_connected(&self) -> bool {
        self.arms.is_connected()
    }

    pub fn is_calibrated(&self) -> bool {
        self.arms.is_calibrated()
    }

    /// Namespaced position keys; matches the follower's action features
    pub fn action_features(&self) -> &Features {
        self.action_features.get_or_init(|| self.arms.motor_features())
    }

    pub async fn connect(&mut self, calibrate: bool) -> Result<(), CoordinatorError> {
        debug!(id = %self.id, calibrate, "BimanualLeader::connect: called");
        if self.is_connected() {
            return Err(CoordinatorError::AlreadyConnected(self.id.clone()));
        }

        run_steps(
            LifecycleOp::Connect { calibrate },
            Policy::FailFast,
            self.arms.steps(DeviceId::Arm),
        )
        .await
        .into_result()
        .map_err(|f| CoordinatorError::Connection {
            device: f.device,
            source: f.error,
        })?;

        info!(id = %self.id, "connected");
        Ok(())
    }

    pub async fn calibrate(&mut self) -> Result<(), CoordinatorError> {
        if !self.is_connected() {
            return Err(CoordinatorError::NotConnected(self.id.clone()));
        }

        run_steps(LifecycleOp::Calibrate, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Calibration {
                device: f.device,
                source: f.error,
            })
    }

    pub async fn configure(&mut self) -> Result<(), CoordinatorError> {
        if !self.is_connected() {
            return Err(CoordinatorError::NotConnected(self.id.clone()));
        }

        run_steps(LifecycleOp::Configure, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Configuration {
                device: f.device,
                source: f.error,
            })
    }

    pub async fn setup_motors(&mut self) -> Result<(), CoordinatorError> {
        run_steps(LifecycleOp::SetupMotors, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Setup {
                device: f.device,
                source: f.error,
            })
    }

    /// Current leader positions as a follower action
    pub async fn get_action(&mut self) -> Result<MotorMap, CoordinatorError> {
        if !self.is_connected() {
            return Err(CoordinatorError::NotConnected(self.id.clone()));
        }

        self.arms
            .read_positions()
            .await
            .map_err(|f| CoordinatorError::Observation {
                device: DeviceId::Arm(f.device),
                source: f.error,
            })
    }

    /// Best-effort teardown; never fails
    pub async fn disconnect(&mut self) {
        debug!(id = %self.id, "BimanualLeader::disconnect: called");
        run_steps(LifecycleOp::Disconnect, Policy::FailSoft, self.arms.steps(DeviceId::Arm)).await;
        info!(id = %self.id, "disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::ArmSettings;
    use hardware::sim::{SimArm, SimOp, SimProbe};
    use tempfile::TempDir;

    fn leader(dir: &TempDir) -> (BimanualLeader, SimProbe, SimProbe) {
        let left = SimArm::so101(ArmSettings::new("/dev/ttyACM2", dir.path()).with_id("rig_leader_left"));
        let right = SimArm::so101(ArmSettings::new("/dev/ttyACM3", dir.path()).with_id("rig_leader_right"));
        let (lp, rp) = (left.probe(), right.probe());
        let leader = BimanualLeader::new("rig_leader", Box::new(left), Box::new(right)).unwrap();
        (leader, lp, rp)
    }

    #[tokio::test]
    async fn test_get_action_is_namespaced_positions() {
        let dir = TempDir::new().unwrap();
        let (mut leader, _, _) = leader(&dir);

        assert!(leader.get_action().await.unwrap_err().is_not_connected());

        leader.connect(false).await.unwrap();
        let action = leader.get_action().await.unwrap();
        let keys: std::collections::BTreeSet<String> = action.keys().cloned().collect();
        assert_eq!(keys, leader.action_features().key_set());
        assert!(keys.iter().all(|k| k.ends_with(".pos")));
    }

    #[tokio::test]
    async fn test_read_failure_names_side() {
        let dir = TempDir::new().unwrap();
        let (mut leader, _, probe) = leader(&dir);
        leader.connect(false).await.unwrap();

        probe.fail_next(SimOp::GetObservation);
        let err = leader.get_action().await.unwrap_err();
        assert_eq!(err.device(), Some(&DeviceId::Arm(Side::Right)));

        leader.disconnect().await;
        assert!(!leader.is_connected());
        assert_eq!(probe.count(SimOp::Disconnect), 1);
    }

    #[tokio::test]
    async fn test_calibrate_and_configure_require_connection() {
        let dir = TempDir::new().unwrap();
        let (mut leader, left, right) = leader(&dir);

        assert!(leader.calibrate().await.unwrap_err().is_not_connected());
        assert!(leader.configure().await.unwrap_err().is_not_connected());
        assert_eq!(left.count(SimOp::Calibrate), 0);
        assert_eq!(right.count(SimOp::Configure), 0);

        leader.connect(false).await.unwrap();
        assert!(!leader.is_calibrated());
        leader.calibrate().await.unwrap();
        leader.configure().await.unwrap();
        assert!(leader.is_calibrated());
        assert!(dir.path().join("rig_leader_left.json").exists());
        assert!(dir.path().join("rig_leader_right.json").exists());
    }

    #[tokio::test]
    async fn test_calibrate_stops_at_failing_side() {
        let dir = TempDir::new().unwrap();
        let (mut leader, left, right) = leader(&dir);
        leader.connect(false).await.unwrap();
        left.fail_next(SimOp::Calibrate);

        let err = leader.calibrate().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Calibration { device: DeviceId::Arm(Side::Left), .. }));
        assert_eq!(right.count(SimOp::Calibrate), 0);
    }

    #[tokio::test]
    async fn test_setup_motors_fails_fast() {
        let dir = TempDir::new().unwrap();
        let (mut leader, left, right) = leader(&dir);
        left.fail_next(SimOp::SetupMotors);

        let err = leader.setup_motors().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Setup { device: DeviceId::Arm(Side::Left), .. }));
        assert_eq!(right.count(SimOp::SetupMotors), 0);

        leader.setup_motors().await.unwrap();
        assert_eq!(left.count(SimOp::SetupMotors), 2);
        assert_eq!(right.count(SimOp::SetupMotors), 1);
    }
}
