//! Bimanual follower coordinator
//!
//! Unifies two follower arms and any number of cameras into one device with a
//! single lifecycle and one merged observation/action schema.
//!
//! # Failure policy
//!
//! - `connect`, `calibrate`, `configure`, `setup_motors`: fail-fast, the error
//!   names the first sub-device that failed. Nothing is rolled back.
//! - `get_observation`, `send_action`: all-or-nothing per call.
//! - `disconnect`: fail-soft, every sub-device gets its attempt and failures
//!   are only logged.
//!
//! Connection and calibration state is never stored here; it is recomputed
//! from the sub-devices on every read.

use std::sync::OnceLock;
use std::time::Instant;

use hardware::{ArmController, CameraSource, MotorMap};
use tracing::{debug, info};

use crate::device::{DeviceId, Side};
use crate::error::CoordinatorError;
use crate::features::{Features, Observation, ObservationValue, camera_key};
use crate::lifecycle::{LifecycleOp, Policy, Step, run_steps};
use crate::pair::ArmPair;

/// Which sides disable torque before disconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorqueOnDisconnect {
    pub left: bool,
    pub right: bool,
}

impl Default for TorqueOnDisconnect {
    fn default() -> Self {
        Self { left: true, right: true }
    }
}

impl TorqueOnDisconnect {
    fn for_side(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

pub struct BimanualFollower {
    id: String,
    arms: ArmPair,
    cameras: Vec<(String, Box<dyn CameraSource>)>,
    torque_on_disconnect: TorqueOnDisconnect,
    observation_features: OnceLock<Features>,
    action_features: OnceLock<Features>,
}

impl BimanualFollower {
    /// Assemble a follower from its sub-devices
    ///
    /// Cameras keep the given order. Fails when an arm channel collides with a
    /// side prefix or a camera name is empty or repeated.
    pub fn new(
        id: impl Into<String>,
        left: Box<dyn ArmController>,
        right: Box<dyn ArmController>,
        cameras: Vec<(String, Box<dyn CameraSource>)>,
    ) -> Result<Self, CoordinatorError> {
        let id = id.into();
        let arms = ArmPair::new(left, right);
        arms.check_channels().map_err(CoordinatorError::Schema)?;

        for (idx, (name, _)) in cameras.iter().enumerate() {
            if name.is_empty() {
                return Err(CoordinatorError::Schema("camera name is empty".to_string()));
            }
            if cameras[..idx].iter().any(|(other, _)| other == name) {
                return Err(CoordinatorError::Schema(format!("camera '{}' configured twice", name)));
            }
        }

        debug!(%id, camera_count = cameras.len(), "BimanualFollower::new: assembled");
        Ok(Self {
            id,
            arms,
            cameras,
            torque_on_disconnect: TorqueOnDisconnect::default(),
            observation_features: OnceLock::new(),
            action_features: OnceLock::new(),
        })
    }

    pub fn with_torque_on_disconnect(mut self, policy: TorqueOnDisconnect) -> Self {
        self.torque_on_disconnect = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn arm(&self, side: Side) -> &dyn ArmController {
        self.arms.arm(side)
    }

    pub fn camera_names(&self) -> impl Iterator<Item = &str> {
        self.cameras.iter().map(|(name, _)| name.as_str())
    }

    /// Both arms and every camera report connected
    pub fn is_connected(&self) -> bool {
        self.arms.is_connected() && self.cameras.iter().all(|(_, camera)| camera.is_connected())
    }

    pub fn is_calibrated(&self) -> bool {
        self.arms.is_calibrated()
    }

    /// Left motors, right motors, then cameras in configuration order
    pub fn observation_features(&self) -> &Features {
        self.observation_features.get_or_init(|| {
            let mut features = self.arms.motor_features();
            for (name, camera) in &self.cameras {
                features.push(camera_key(name), camera.shape().into());
            }
            features
        })
    }

    pub fn action_features(&self) -> &Features {
        self.action_features.get_or_init(|| self.arms.motor_features())
    }

    fn steps(&mut self) -> Vec<Step<'_, DeviceId>> {
        let mut steps = self.arms.steps(DeviceId::Arm);
        for (name, camera) in self.cameras.iter_mut() {
            steps.push(Step::camera(DeviceId::Camera(name.clone()), camera.as_mut()));
        }
        steps
    }

    fn ensure_connected(&self) -> Result<(), CoordinatorError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CoordinatorError::NotConnected(self.id.clone()))
        }
    }

    /// Connect left arm, right arm, then each camera
    ///
    /// Sub-devices that already report connected are skipped, so calling again
    /// after a partial failure resumes where it stopped.
    pub async fn connect(&mut self, calibrate: bool) -> Result<(), CoordinatorError> {
        debug!(id = %self.id, calibrate, "BimanualFollower::connect: called");
        if self.is_connected() {
            return Err(CoordinatorError::AlreadyConnected(self.id.clone()));
        }

        run_steps(LifecycleOp::Connect { calibrate }, Policy::FailFast, self.steps())
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
        debug!(id = %self.id, "BimanualFollower::calibrate: called");
        self.ensure_connected()?;

        run_steps(LifecycleOp::Calibrate, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Calibration {
                device: f.device,
                source: f.error,
            })
    }

    pub async fn configure(&mut self) -> Result<(), CoordinatorError> {
        debug!(id = %self.id, "BimanualFollower::configure: called");
        self.ensure_connected()?;

        run_steps(LifecycleOp::Configure, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Configuration {
                device: f.device,
                source: f.error,
            })
    }

    /// Assign motor ids on both arms, left first
    pub async fn setup_motors(&mut self) -> Result<(), CoordinatorError> {
        debug!(id = %self.id, "BimanualFollower::setup_motors: called");
        run_steps(LifecycleOp::SetupMotors, Policy::FailFast, self.arms.steps(DeviceId::Arm))
            .await
            .into_result()
            .map_err(|f| CoordinatorError::Setup {
                device: f.device,
                source: f.error,
            })
    }

    /// Read both arms' positions and one frame per camera
    pub async fn get_observation(&mut self) -> Result<Observation, CoordinatorError> {
        self.ensure_connected()?;
        let start = Instant::now();

        let positions = self
            .arms
            .read_positions()
            .await
            .map_err(|f| CoordinatorError::Observation {
                device: DeviceId::Arm(f.device),
                source: f.error,
            })?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "BimanualFollower::get_observation: read arms");

        let mut observation: Observation = positions
            .into_iter()
            .map(|(key, value)| (key, ObservationValue::Position(value)))
            .collect();

        for (name, camera) in self.cameras.iter_mut() {
            let read_start = Instant::now();
            let frame = camera
                .read_frame()
                .await
                .map_err(|source| CoordinatorError::Observation {
                    device: DeviceId::Camera(name.clone()),
                    source,
                })?;
            debug!(
                camera = %name,
                elapsed_ms = read_start.elapsed().as_millis() as u64,
                "BimanualFollower::get_observation: read frame"
            );
            observation.insert(camera_key(name), ObservationValue::Image(frame));
        }

        Ok(observation)
    }

    /// Route a merged action to the arms; returns what was actually applied
    pub async fn send_action(&mut self, action: &MotorMap) -> Result<MotorMap, CoordinatorError> {
        self.ensure_connected()?;

        self.arms
            .route_action(action)
            .await
            .map_err(|f| CoordinatorError::Action {
                device: DeviceId::Arm(f.device),
                source: f.error,
            })
    }

    /// Best-effort teardown; never fails
    pub async fn disconnect(&mut self) {
        debug!(id = %self.id, "BimanualFollower::disconnect: called");
        let torque = self.torque_on_disconnect;

        let torque_steps: Vec<_> = self
            .arms
            .steps(DeviceId::Arm)
            .into_iter()
            .filter(|step| matches!(step.device, DeviceId::Arm(side) if torque.for_side(side)))
            .collect();
        run_steps(LifecycleOp::DisableTorque, Policy::FailSoft, torque_steps).await;

        let report = run_steps(LifecycleOp::Disconnect, Policy::FailSoft, self.steps()).await;
        if report.is_ok() {
            info!(id = %self.id, "disconnected");
        } else {
            info!(id = %self.id, failures = report.failures.len(), "disconnected with errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::sim::{SimArm, SimCamera, SimOp, SimProbe};
    use hardware::{ArmSettings, FrameShape};
    use tempfile::TempDir;

    struct Rig {
        follower: BimanualFollower,
        left: SimProbe,
        right: SimProbe,
        cameras: Vec<SimProbe>,
        _dir: TempDir,
    }

    fn rig(camera_count: usize, left_limit: Option<f64>) -> Rig {
        let dir = TempDir::new().unwrap();
        let mut left_settings = ArmSettings::new("/dev/ttyACM0", dir.path()).with_id("rig_left");
        left_settings.max_relative_target = left_limit;
        let left = SimArm::so101(left_settings);
        let right = SimArm::so101(ArmSettings::new("/dev/ttyACM1", dir.path()).with_id("rig_right"));
        let (lp, rp) = (left.probe(), right.probe());

        let mut cameras: Vec<(String, Box<dyn CameraSource>)> = Vec::new();
        let mut camera_probes = Vec::new();
        for idx in 0..camera_count {
            let camera = SimCamera::new(format!("cam{}", idx), FrameShape::rgb(4, 6), 0);
            camera_probes.push(camera.probe());
            cameras.push((format!("cam{}", idx), Box::new(camera)));
        }

        let follower = BimanualFollower::new("rig", Box::new(left), Box::new(right), cameras).unwrap();
        Rig {
            follower,
            left: lp,
            right: rp,
            cameras: camera_probes,
            _dir: dir,
        }
    }

    fn action(entries: &[(&str, f64)]) -> MotorMap {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_connect_then_is_connected() {
        let mut rig = rig(2, None);
        assert!(!rig.follower.is_connected());

        rig.follower.connect(false).await.unwrap();
        assert!(rig.follower.is_connected());
        assert!(!rig.follower.is_calibrated());

        rig.cameras[1].set_connected(false);
        assert!(!rig.follower.is_connected());
        rig.cameras[1].set_connected(true);
        rig.right.set_connected(false);
        assert!(!rig.follower.is_connected());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();

        let err = rig.follower.connect(false).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyConnected(_)));
        assert_eq!(rig.left.count(SimOp::Connect), 1);
    }

    #[tokio::test]
    async fn test_connect_order_is_left_right_cameras() {
        let mut rig = rig(1, None);
        rig.right.fail_next(SimOp::Connect);

        let err = rig.follower.connect(false).await.unwrap_err();
        assert_eq!(err.device(), Some(&DeviceId::Arm(Side::Right)));
        assert_eq!(rig.cameras[0].count(SimOp::Connect), 0);
        assert!(rig.left.is_connected());

        // Retrying resumes with the devices that are still down
        rig.follower.connect(false).await.unwrap();
        assert_eq!(rig.left.count(SimOp::Connect), 1);
        assert_eq!(rig.right.count(SimOp::Connect), 2);
        assert!(rig.follower.is_connected());
    }

    #[tokio::test]
    async fn test_camera_connect_failure_names_camera() {
        let mut rig = rig(2, None);
        rig.cameras[1].fail_next(SimOp::Connect);

        let err = rig.follower.connect(false).await.unwrap_err();
        assert_eq!(err.device(), Some(&DeviceId::Camera("cam1".to_string())));
        assert!(rig.cameras[0].is_connected());
    }

    #[tokio::test]
    async fn test_calibrate_reports_failing_side() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();
        rig.left.fail_next(SimOp::Calibrate);

        let err = rig.follower.calibrate().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Calibration { device: DeviceId::Arm(Side::Left), .. }));
        assert_eq!(rig.right.count(SimOp::Calibrate), 0);

        rig.follower.calibrate().await.unwrap();
        assert!(rig.follower.is_calibrated());
    }

    #[tokio::test]
    async fn test_configure_is_repeatable() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();

        rig.follower.configure().await.unwrap();
        rig.follower.configure().await.unwrap();
        assert_eq!(rig.left.count(SimOp::Configure), 2);
        assert_eq!(rig.right.count(SimOp::Configure), 2);
    }

    #[tokio::test]
    async fn test_configure_fails_fast_naming_side() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();
        rig.left.fail_next(SimOp::Configure);

        let err = rig.follower.configure().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Configuration { device: DeviceId::Arm(Side::Left), .. }));
        assert_eq!(rig.right.count(SimOp::Configure), 0);

        rig.right.fail_next(SimOp::Configure);
        let err = rig.follower.configure().await.unwrap_err();
        assert_eq!(err.device(), Some(&DeviceId::Arm(Side::Right)));
        assert_eq!(rig.left.count(SimOp::Configure), 2);
        assert_eq!(rig.right.count(SimOp::Configure), 1);
    }

    #[tokio::test]
    async fn test_setup_motors_runs_left_then_right() {
        let mut rig = rig(1, None);
        rig.right.fail_next(SimOp::SetupMotors);

        let err = rig.follower.setup_motors().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Setup { device: DeviceId::Arm(Side::Right), .. }));
        assert_eq!(rig.left.calls(), vec![SimOp::SetupMotors]);
        assert_eq!(rig.right.calls(), vec![SimOp::SetupMotors]);
        assert!(rig.cameras[0].calls().is_empty());

        rig.left.fail_next(SimOp::SetupMotors);
        let err = rig.follower.setup_motors().await.unwrap_err();
        assert_eq!(err.device(), Some(&DeviceId::Arm(Side::Left)));
        assert_eq!(rig.right.count(SimOp::SetupMotors), 1);

        rig.follower.setup_motors().await.unwrap();
        assert_eq!(rig.left.count(SimOp::SetupMotors), 3);
        assert_eq!(rig.right.count(SimOp::SetupMotors), 2);
        assert!(!rig.follower.is_connected());
    }

    #[tokio::test]
    async fn test_observation_matches_features() {
        let mut rig = rig(3, None);
        rig.follower.connect(false).await.unwrap();

        let observation = rig.follower.get_observation().await.unwrap();
        let keys: std::collections::BTreeSet<String> = observation.keys().cloned().collect();
        assert_eq!(keys, rig.follower.observation_features().key_set());
        assert!(!observation.contains_key("left_gripper.load"));

        let frame = observation["observation.images.cam2"].as_image().unwrap();
        assert_eq!(frame.shape(), FrameShape::rgb(4, 6));
        assert_eq!(observation["right_gripper.pos"].as_position(), Some(0.0));
    }

    #[tokio::test]
    async fn test_observation_is_all_or_nothing() {
        let mut rig = rig(2, None);
        rig.follower.connect(false).await.unwrap();
        rig.cameras[1].fail_next(SimOp::ReadFrame);

        let err = rig.follower.get_observation().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Observation { device: DeviceId::Camera(ref name), .. } if name == "cam1"));
    }

    #[tokio::test]
    async fn test_feature_order_is_stable() {
        let rig = rig(2, None);
        let keys: Vec<&str> = rig.follower.observation_features().keys().collect();
        assert_eq!(keys.first(), Some(&"left_shoulder_pan.pos"));
        assert_eq!(keys[6], "right_shoulder_pan.pos");
        assert_eq!(&keys[12..], &["observation.images.cam0", "observation.images.cam1"]);
        assert_eq!(rig.follower.action_features().len(), 12);
    }

    #[tokio::test]
    async fn test_send_action_returns_clamped_values() {
        let mut rig = rig(0, Some(5.0));
        rig.follower.connect(false).await.unwrap();
        rig.right.clear_calls();

        let sent = rig
            .follower
            .send_action(&action(&[("left_shoulder_pan.pos", 10.0)]))
            .await
            .unwrap();
        assert_eq!(sent, action(&[("left_shoulder_pan.pos", 5.0)]));
        assert!(rig.right.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_empty_action_calls_nothing() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();
        rig.left.clear_calls();
        rig.right.clear_calls();

        let sent = rig.follower.send_action(&MotorMap::new()).await.unwrap();
        assert!(sent.is_empty());
        assert!(rig.left.calls().is_empty());
        assert!(rig.right.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unprefixed_keys_are_not_routed() {
        let mut rig = rig(0, None);
        rig.follower.connect(false).await.unwrap();
        rig.left.clear_calls();

        let sent = rig
            .follower
            .send_action(&action(&[("gripper.pos", 10.0), ("right_gripper.pos", 20.0)]))
            .await
            .unwrap();
        assert_eq!(sent, action(&[("right_gripper.pos", 20.0)]));
        assert!(rig.left.calls().is_empty());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut rig = rig(1, None);

        assert!(rig.follower.get_observation().await.unwrap_err().is_not_connected());
        assert!(
            rig.follower
                .send_action(&action(&[("left_gripper.pos", 1.0)]))
                .await
                .unwrap_err()
                .is_not_connected()
        );
        assert!(rig.follower.calibrate().await.unwrap_err().is_not_connected());
        assert!(rig.follower.configure().await.unwrap_err().is_not_connected());

        assert!(rig.left.calls().is_empty());
        assert!(rig.right.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_continues_past_failures() {
        let mut rig = rig(2, None);
        rig.follower.connect(false).await.unwrap();
        rig.left.fail_next(SimOp::DisableTorque);
        rig.left.fail_next(SimOp::Disconnect);
        rig.cameras[0].fail_next(SimOp::Disconnect);

        rig.follower.disconnect().await;

        assert_eq!(rig.left.count(SimOp::Disconnect), 1);
        assert!(!rig.right.is_connected());
        assert!(!rig.cameras[1].is_connected());
        assert_eq!(rig.right.count(SimOp::DisableTorque), 1);
        assert!(!rig.follower.is_connected());
    }

    #[tokio::test]
    async fn test_torque_flag_is_per_side() {
        let mut rig = rig(0, None);
        rig.follower = rig.follower.with_torque_on_disconnect(TorqueOnDisconnect {
            left: false,
            right: true,
        });
        rig.follower.connect(false).await.unwrap();

        rig.follower.disconnect().await;
        assert_eq!(rig.left.count(SimOp::DisableTorque), 0);
        assert_eq!(rig.right.count(SimOp::DisableTorque), 1);
    }

    #[test]
    fn test_reserved_prefix_is_rejected() {
        let dir = TempDir::new().unwrap();
        let left = SimArm::new(
            ArmSettings::new("/dev/ttyACM0", dir.path()),
            vec!["left_elbow".to_string()],
        );
        let right = SimArm::so101(ArmSettings::new("/dev/ttyACM1", dir.path()));

        let result = BimanualFollower::new("rig", Box::new(left), Box::new(right), Vec::new());
        assert!(matches!(result, Err(CoordinatorError::Schema(_))));
    }

    #[test]
    fn test_duplicate_camera_is_rejected() {
        let dir = TempDir::new().unwrap();
        let left = SimArm::so101(ArmSettings::new("/dev/ttyACM0", dir.path()));
        let right = SimArm::so101(ArmSettings::new("/dev/ttyACM1", dir.path()));
        let cameras: Vec<(String, Box<dyn CameraSource>)> = vec![
            ("wrist".to_string(), Box::new(SimCamera::new("wrist", FrameShape::rgb(2, 2), 0))),
            ("wrist".to_string(), Box::new(SimCamera::new("wrist", FrameShape::rgb(2, 2), 0))),
        ];

        let result = BimanualFollower::new("rig", Box::new(left), Box::new(right), cameras);
        assert!(matches!(result, Err(CoordinatorError::Schema(_))));
    }
}
