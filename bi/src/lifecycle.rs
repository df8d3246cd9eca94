//! Lifecycle step runner
//!
//! Setup and teardown walk the same ordered list of sub-devices; they differ
//! only in what happens when a step fails. [`Policy::FailFast`] stops at the
//! first failure, [`Policy::FailSoft`] logs it and keeps going so every device
//! gets its attempt.

use hardware::{ArmController, CameraSource, DeviceError};
use tracing::{debug, warn};

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    FailFast,
    FailSoft,
}

/// Operation applied to each step's device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Connect { calibrate: bool },
    Calibrate,
    Configure,
    SetupMotors,
    DisableTorque,
    Disconnect,
}

impl std::fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { .. } => write!(f, "connect"),
            Self::Calibrate => write!(f, "calibrate"),
            Self::Configure => write!(f, "configure"),
            Self::SetupMotors => write!(f, "setup_motors"),
            Self::DisableTorque => write!(f, "disable_torque"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Borrowed sub-device a step operates on
pub enum Target<'a> {
    Arm(&'a mut dyn ArmController),
    Camera(&'a mut dyn CameraSource),
}

/// Result of applying an operation to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Done,
    /// Nothing to do: already in the target state, or the op does not apply
    Skipped,
}

impl Target<'_> {
    pub fn is_connected(&self) -> bool {
        match self {
            Self::Arm(arm) => arm.is_connected(),
            Self::Camera(camera) => camera.is_connected(),
        }
    }

    async fn apply(&mut self, op: LifecycleOp) -> Result<Applied, DeviceError> {
        let connected = self.is_connected();
        match (op, self) {
            (LifecycleOp::Connect { .. }, _) if connected => Ok(Applied::Skipped),
            (LifecycleOp::Disconnect | LifecycleOp::DisableTorque, _) if !connected => Ok(Applied::Skipped),
            (LifecycleOp::Connect { calibrate }, Self::Arm(arm)) => arm.connect(calibrate).await.map(|_| Applied::Done),
            (LifecycleOp::Connect { .. }, Self::Camera(camera)) => camera.connect().await.map(|_| Applied::Done),
            (LifecycleOp::Calibrate, Self::Arm(arm)) => arm.calibrate().await.map(|_| Applied::Done),
            (LifecycleOp::Configure, Self::Arm(arm)) => arm.configure().await.map(|_| Applied::Done),
            (LifecycleOp::SetupMotors, Self::Arm(arm)) => arm.setup_motors().await.map(|_| Applied::Done),
            (LifecycleOp::DisableTorque, Self::Arm(arm)) => arm.disable_torque().await.map(|_| Applied::Done),
            (LifecycleOp::Disconnect, Self::Arm(arm)) => arm.disconnect().await.map(|_| Applied::Done),
            (LifecycleOp::Disconnect, Self::Camera(camera)) => camera.disconnect().await.map(|_| Applied::Done),
            (_, Self::Camera(_)) => Ok(Applied::Skipped),
        }
    }
}

/// One labelled device in an ordered step list
pub struct Step<'a, L> {
    pub device: L,
    pub target: Target<'a>,
}

impl<'a, L> Step<'a, L> {
    pub fn arm(device: L, arm: &'a mut dyn ArmController) -> Self {
        Self {
            device,
            target: Target::Arm(arm),
        }
    }

    pub fn camera(device: L, camera: &'a mut dyn CameraSource) -> Self {
        Self {
            device,
            target: Target::Camera(camera),
        }
    }
}

/// A device that failed, with its error
#[derive(Debug)]
pub struct DeviceFailure<L> {
    pub device: L,
    pub error: DeviceError,
}

/// Outcome of a step run
#[derive(Debug)]
pub struct StepReport<L> {
    pub completed: Vec<L>,
    pub failures: Vec<DeviceFailure<L>>,
}

impl<L> StepReport<L> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure as an error
    pub fn into_result(self) -> Result<(), DeviceFailure<L>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Apply `op` to each step in order under `policy`
pub async fn run_steps<L>(op: LifecycleOp, policy: Policy, steps: Vec<Step<'_, L>>) -> StepReport<L>
where
    L: std::fmt::Display + Send,
{
    debug!(%op, ?policy, step_count = steps.len(), "run_steps: called");
    let mut report = StepReport {
        completed: Vec::new(),
        failures: Vec::new(),
    };

    for mut step in steps {
        match step.target.apply(op).await {
            Ok(Applied::Done) => {
                debug!(%op, device = %step.device, "run_steps: step done");
                report.completed.push(step.device);
            }
            Ok(Applied::Skipped) => {
                debug!(%op, device = %step.device, "run_steps: step skipped");
            }
            Err(error) => {
                warn!(%op, device = %step.device, %error, "Lifecycle step failed");
                report.failures.push(DeviceFailure {
                    device: step.device,
                    error,
                });
                if policy == Policy::FailFast {
                    break;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::sim::{SimArm, SimCamera, SimOp};
    use hardware::{ArmSettings, FrameShape};
    use tempfile::TempDir;

    fn arms(dir: &TempDir) -> (SimArm, SimArm) {
        (
            SimArm::so101(ArmSettings::new("/dev/ttyACM0", dir.path()).with_id("a")),
            SimArm::so101(ArmSettings::new("/dev/ttyACM1", dir.path()).with_id("b")),
        )
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let (mut a, mut b) = arms(&dir);
        let (pa, pb) = (a.probe(), b.probe());
        pa.fail_next(SimOp::Connect);

        let steps = vec![Step::arm("a", &mut a), Step::arm("b", &mut b)];
        let report = run_steps(LifecycleOp::Connect { calibrate: false }, Policy::FailFast, steps).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].device, "a");
        assert_eq!(pb.count(SimOp::Connect), 0);
    }

    #[tokio::test]
    async fn test_fail_soft_attempts_every_step() {
        let dir = TempDir::new().unwrap();
        let (mut a, mut b) = arms(&dir);
        let mut camera = SimCamera::new("wrist", FrameShape::rgb(2, 2), 0);
        let (pa, pb, pc) = (a.probe(), b.probe(), camera.probe());

        let steps = vec![Step::arm("a", &mut a), Step::arm("b", &mut b), Step::camera("wrist", &mut camera)];
        let report = run_steps(LifecycleOp::Connect { calibrate: false }, Policy::FailFast, steps).await;
        assert!(report.is_ok());
        assert_eq!(report.completed, vec!["a", "b", "wrist"]);

        pa.fail_next(SimOp::Disconnect);
        let steps = vec![Step::arm("a", &mut a), Step::arm("b", &mut b), Step::camera("wrist", &mut camera)];
        let report = run_steps(LifecycleOp::Disconnect, Policy::FailSoft, steps).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.completed, vec!["b", "wrist"]);
        assert!(!pb.is_connected());
        assert!(!pc.is_connected());
    }

    #[tokio::test]
    async fn test_skips_devices_already_in_target_state() {
        let dir = TempDir::new().unwrap();
        let (mut a, mut b) = arms(&dir);
        let (pa, pb) = (a.probe(), b.probe());
        a.connect(false).await.unwrap();

        let steps = vec![Step::arm("a", &mut a), Step::arm("b", &mut b)];
        let report = run_steps(LifecycleOp::Connect { calibrate: false }, Policy::FailFast, steps).await;
        assert_eq!(report.completed, vec!["b"]);
        assert_eq!(pa.count(SimOp::Connect), 1);

        pb.set_connected(false);
        let steps = vec![Step::arm("a", &mut a), Step::arm("b", &mut b)];
        let report = run_steps(LifecycleOp::Disconnect, Policy::FailSoft, steps).await;
        assert_eq!(report.completed, vec!["a"]);
        assert_eq!(pb.count(SimOp::Disconnect), 0);
    }

    #[tokio::test]
    async fn test_arm_only_ops_skip_cameras() {
        let mut camera = SimCamera::new("wrist", FrameShape::rgb(2, 2), 0);
        let probe = camera.probe();
        camera.connect().await.unwrap();

        let steps = vec![Step::camera("wrist", &mut camera as &mut dyn CameraSource)];
        let report = run_steps(LifecycleOp::Calibrate, Policy::FailFast, steps).await;
        assert!(report.is_ok());
        assert!(report.completed.is_empty());
        assert_eq!(probe.calls(), vec![SimOp::Connect]);
    }
}
