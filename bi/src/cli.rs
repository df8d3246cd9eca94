//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// bi - bimanual SO-101 rig control
#[derive(Parser)]
#[command(
    name = "bi",
    about = "Calibrate, check and teleoperate a bimanual SO-101 rig",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Replace every configured device with its simulated counterpart
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calibrate both follower arms, then both leader arms
    Calibrate {
        /// Do not wait for confirmation before each arm
        #[arg(short, long)]
        yes: bool,
    },

    /// Connect the follower, read once, hold position, disconnect
    Check {
        /// Leave configured cameras out of the check
        #[arg(long)]
        skip_cameras: bool,
    },

    /// Mirror the leader arms onto the follower arms
    Teleop {
        /// Stop after this many seconds (default: config, else until Ctrl+C)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Loop rate in Hz (default: config)
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Assign motor ids on one arm pair
    SetupMotors {
        /// Which pair to set up (follower, leader)
        #[arg(short, long)]
        target: SetupTarget,
    },

    /// Print the observation and action schema
    Features {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Arm pair addressed by `setup-motors`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupTarget {
    Follower,
    Leader,
}

impl std::str::FromStr for SetupTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "SetupTarget::from_str: called");
        match s.to_lowercase().as_str() {
            "follower" | "followers" => Ok(Self::Follower),
            "leader" | "leaders" => Ok(Self::Leader),
            _ => Err(format!("Unknown target: {}. Use: follower or leader", s)),
        }
    }
}

impl std::fmt::Display for SetupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Output format for the features command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => {
                debug!("OutputFormat::from_str: matched Text");
                Ok(Self::Text)
            }
            "json" => {
                debug!("OutputFormat::from_str: matched Json");
                Ok(Self::Json)
            }
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_calibrate() {
        let cli = Cli::parse_from(["bi", "calibrate", "--yes"]);
        assert!(matches!(cli.command, Command::Calibrate { yes: true }));
        assert!(!cli.simulate);
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["bi", "check", "--simulate", "-l", "debug", "--skip-cameras"]);
        assert!(cli.simulate);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Check { skip_cameras: true }));
    }

    #[test]
    fn test_cli_parse_teleop() {
        let cli = Cli::parse_from(["bi", "teleop", "--duration", "2.5", "--fps", "30"]);
        match cli.command {
            Command::Teleop { duration, fps } => {
                assert_eq!(duration, Some(2.5));
                assert_eq!(fps, Some(30));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_setup_motors() {
        let cli = Cli::parse_from(["bi", "setup-motors", "--target", "leader"]);
        assert!(matches!(
            cli.command,
            Command::SetupMotors {
                target: SetupTarget::Leader
            }
        ));
        assert!(Cli::try_parse_from(["bi", "setup-motors", "--target", "tail"]).is_err());
    }

    #[test]
    fn test_cli_parse_features_format() {
        let cli = Cli::parse_from(["bi", "features", "--format", "JSON"]);
        assert!(matches!(cli.command, Command::Features { format: OutputFormat::Json }));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["bi"]).is_err());
    }
}
