//! Guided calibration of a full teleoperation rig
//!
//! Drives the follower pair and then the leader pair through a fixed sequence:
//!
//! ```text
//! Idle -> ConnectingFollowers -> CalibratingFollowerLeft -> CalibratingFollowerRight
//!      -> DisconnectingFollowers -> ConnectingLeaders -> CalibratingLeaderLeft
//!      -> CalibratingLeaderRight -> DisconnectingLeaders -> Done
//! ```
//!
//! Any step can fail into `Failed`. On failure every arm the sequencer
//! connected and has not yet disconnected gets exactly one disconnect attempt
//! before the failure is returned. There is no resume; a failed run is
//! repeated from the start with a fresh sequencer.

use hardware::DeviceError;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::device::{ArmGroup, ArmRole, Side};
use crate::lifecycle::{LifecycleOp, Policy, Step, run_steps};
use crate::operator::{Acknowledgement, Operator};
use crate::pair::ArmPair;

/// Sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationState {
    Idle,
    ConnectingFollowers,
    CalibratingFollowerLeft,
    CalibratingFollowerRight,
    DisconnectingFollowers,
    ConnectingLeaders,
    CalibratingLeaderLeft,
    CalibratingLeaderRight,
    DisconnectingLeaders,
    Done,
    Failed,
}

impl CalibrationState {
    /// Successor on the success path; terminal states have none
    pub fn next(self) -> Option<Self> {
        use CalibrationState::*;
        match self {
            Idle => Some(ConnectingFollowers),
            ConnectingFollowers => Some(CalibratingFollowerLeft),
            CalibratingFollowerLeft => Some(CalibratingFollowerRight),
            CalibratingFollowerRight => Some(DisconnectingFollowers),
            DisconnectingFollowers => Some(ConnectingLeaders),
            ConnectingLeaders => Some(CalibratingLeaderLeft),
            CalibratingLeaderLeft => Some(CalibratingLeaderRight),
            CalibratingLeaderRight => Some(DisconnectingLeaders),
            DisconnectingLeaders => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The arm this state calibrates, if it is a calibration step
    pub fn calibrates(self) -> Option<ArmRole> {
        use CalibrationState::*;
        match self {
            CalibratingFollowerLeft => Some(ArmRole::new(Side::Left, ArmGroup::Follower)),
            CalibratingFollowerRight => Some(ArmRole::new(Side::Right, ArmGroup::Follower)),
            CalibratingLeaderLeft => Some(ArmRole::new(Side::Left, ArmGroup::Leader)),
            CalibratingLeaderRight => Some(ArmRole::new(Side::Right, ArmGroup::Leader)),
            _ => None,
        }
    }
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ConnectingFollowers => "connecting_followers",
            Self::CalibratingFollowerLeft => "calibrating_follower_left",
            Self::CalibratingFollowerRight => "calibrating_follower_right",
            Self::DisconnectingFollowers => "disconnecting_followers",
            Self::ConnectingLeaders => "connecting_leaders",
            Self::CalibratingLeaderLeft => "calibrating_leader_left",
            Self::CalibratingLeaderRight => "calibrating_leader_right",
            Self::DisconnectingLeaders => "disconnecting_leaders",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// One gated calibration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationStep {
    pub role: ArmRole,
    pub prompt: String,
}

/// The four calibrations in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationPlan {
    steps: Vec<CalibrationStep>,
}

impl CalibrationPlan {
    /// Followers before leaders, left before right
    pub fn standard() -> Self {
        let step = |side: Side, group: ArmGroup| CalibrationStep {
            role: ArmRole::new(side, group),
            prompt: format!(
                "Calibrating {} {} arm. Move it to the middle of its range of motion.",
                side.as_str().to_uppercase(),
                group
            ),
        };
        Self {
            steps: vec![
                step(Side::Left, ArmGroup::Follower),
                step(Side::Right, ArmGroup::Follower),
                step(Side::Left, ArmGroup::Leader),
                step(Side::Right, ArmGroup::Leader),
            ],
        }
    }

    pub fn steps(&self) -> &[CalibrationStep] {
        &self.steps
    }

    pub fn step(&self, role: ArmRole) -> Option<&CalibrationStep> {
        self.steps.iter().find(|s| s.role == role)
    }
}

/// Why a sequence failed
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Failed to connect {role}: {source}")]
    Connection { role: ArmRole, source: DeviceError },

    #[error("Calibration of {role} failed: {source}")]
    Calibration { role: ArmRole, source: DeviceError },

    #[error("Operator aborted before calibrating {role}")]
    Aborted { role: ArmRole },

    #[error("Failed to disconnect {role}: {source}")]
    Disconnect { role: ArmRole, source: DeviceError },
}

impl SequencerError {
    /// The arm the failure is attributed to
    pub fn role(&self) -> ArmRole {
        match self {
            Self::Connection { role, .. }
            | Self::Calibration { role, .. }
            | Self::Aborted { role }
            | Self::Disconnect { role, .. } => *role,
        }
    }
}

/// A sequence that ended in `Failed`
#[derive(Debug, Error)]
#[error("Calibration sequence failed during {state}: {error}")]
pub struct CalibrationFailure {
    /// State whose step failed
    pub state: CalibrationState,
    #[source]
    pub error: SequencerError,
    /// Every state entered, ending with `Failed`
    pub history: Vec<CalibrationState>,
}

impl CalibrationFailure {
    pub fn role(&self) -> ArmRole {
        self.error.role()
    }
}

/// A sequence that reached `Done`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationReport {
    /// Every state entered, ending with `Done`
    pub history: Vec<CalibrationState>,
    pub calibrated: Vec<ArmRole>,
}

pub struct CalibrationSequencer<O> {
    followers: ArmPair,
    leaders: ArmPair,
    operator: O,
    plan: CalibrationPlan,
    /// Arms this run connected and has not disconnected yet
    open: Vec<ArmRole>,
}

impl<O: Operator> CalibrationSequencer<O> {
    pub fn new(followers: ArmPair, leaders: ArmPair, operator: O) -> Self {
        Self {
            followers,
            leaders,
            operator,
            plan: CalibrationPlan::standard(),
            open: Vec::new(),
        }
    }

    pub fn plan(&self) -> &CalibrationPlan {
        &self.plan
    }

    fn pair_mut(&mut self, group: ArmGroup) -> &mut ArmPair {
        match group {
            ArmGroup::Follower => &mut self.followers,
            ArmGroup::Leader => &mut self.leaders,
        }
    }

    /// Run the whole sequence; consumes the sequencer
    pub async fn run(mut self) -> Result<CalibrationReport, CalibrationFailure> {
        info!("Starting bimanual calibration");
        let mut state = CalibrationState::Idle;
        let mut history = vec![state];
        let mut calibrated = Vec::new();

        while let Some(next) = state.next() {
            debug!(from = %state, to = %next, "CalibrationSequencer::run: transition");
            history.push(next);

            if let Err(error) = self.enter(next).await {
                error!(state = %next, device = %error.role(), %error, "Calibration failed");
                history.push(CalibrationState::Failed);
                self.cleanup().await;
                return Err(CalibrationFailure {
                    state: next,
                    error,
                    history,
                });
            }

            if let Some(role) = next.calibrates() {
                calibrated.push(role);
            }
            state = next;
        }

        info!("Bimanual calibration complete");
        Ok(CalibrationReport { history, calibrated })
    }

    async fn enter(&mut self, state: CalibrationState) -> Result<(), SequencerError> {
        if let Some(role) = state.calibrates() {
            return self.calibrate_one(role).await;
        }
        match state {
            CalibrationState::ConnectingFollowers => self.connect_group(ArmGroup::Follower).await,
            CalibrationState::ConnectingLeaders => self.connect_group(ArmGroup::Leader).await,
            CalibrationState::DisconnectingFollowers => self.disconnect_group(ArmGroup::Follower).await,
            CalibrationState::DisconnectingLeaders => self.disconnect_group(ArmGroup::Leader).await,
            _ => Ok(()),
        }
    }

    /// Connect both arms of a group with calibration disabled
    async fn connect_group(&mut self, group: ArmGroup) -> Result<(), SequencerError> {
        let report = run_steps(
            LifecycleOp::Connect { calibrate: false },
            Policy::FailFast,
            self.pair_mut(group).steps(|side| ArmRole::new(side, group)),
        )
        .await;

        self.open.extend(report.completed.iter().copied());
        report.into_result().map_err(|f| SequencerError::Connection {
            role: f.device,
            source: f.error,
        })
    }

    async fn calibrate_one(&mut self, role: ArmRole) -> Result<(), SequencerError> {
        let prompt = match self.plan.step(role) {
            Some(step) => step.prompt.clone(),
            None => format!("Calibrating {}", role),
        };

        if self.operator.acknowledge(&prompt).await == Acknowledgement::Abort {
            return Err(SequencerError::Aborted { role });
        }

        info!(device = %role, "Calibrating");
        self.pair_mut(role.group)
            .arm_mut(role.side)
            .calibrate()
            .await
            .map_err(|source| SequencerError::Calibration { role, source })?;
        info!(device = %role, "Calibrated");
        Ok(())
    }

    async fn disconnect_group(&mut self, group: ArmGroup) -> Result<(), SequencerError> {
        let report = run_steps(
            LifecycleOp::Disconnect,
            Policy::FailSoft,
            self.pair_mut(group).steps(|side| ArmRole::new(side, group)),
        )
        .await;

        // Each arm had its one attempt, whatever the outcome
        self.open.retain(|role| role.group != group);
        report.into_result().map_err(|f| SequencerError::Disconnect {
            role: f.device,
            source: f.error,
        })
    }

    /// Disconnect every arm still open, each once
    async fn cleanup(&mut self) {
        if self.open.is_empty() {
            return;
        }
        debug!(open = ?self.open, "CalibrationSequencer::cleanup: called");

        let open = std::mem::take(&mut self.open);
        let mut steps: Vec<Step<'_, ArmRole>> = Vec::new();
        steps.extend(
            self.followers
                .steps(|side| ArmRole::new(side, ArmGroup::Follower))
                .into_iter()
                .filter(|step| open.contains(&step.device)),
        );
        steps.extend(
            self.leaders
                .steps(|side| ArmRole::new(side, ArmGroup::Leader))
                .into_iter()
                .filter(|step| open.contains(&step.device)),
        );

        run_steps(LifecycleOp::Disconnect, Policy::FailSoft, steps).await;
    }
}
