//! Sub-device identities

use serde::{Deserialize, Serialize};

/// Which arm of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides in the fixed operating order
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Namespace prefix applied to this side's channel keys
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Left => "left_",
            Self::Right => "right_",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A sub-device owned by a coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Arm(Side),
    Camera(String),
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm(side) => write!(f, "{}", side),
            Self::Camera(name) => write!(f, "camera:{}", name),
        }
    }
}

/// Follower arms execute commands; leader arms are moved by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmGroup {
    Follower,
    Leader,
}

impl std::fmt::Display for ArmGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// One of the four arms of a teleoperation rig (`left_leader`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArmRole {
    pub side: Side,
    pub group: ArmGroup,
}

impl ArmRole {
    pub fn new(side: Side, group: ArmGroup) -> Self {
        Self { side, group }
    }
}

impl std::fmt::Display for ArmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.side, self.group)
    }
}
