//! bi - bimanual SO-101 rig control
//!
//! CLI entry point for calibration, hardware checks and teleoperation.

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tracing::{debug, info, warn};

use bimanual::cli::{Cli, Command, OutputFormat, SetupTarget};
use bimanual::config::{Config, duration_from_secs};
use bimanual::control::{ControlLoop, LoopStats, Tick, TickSink};
use bimanual::device::Side;
use bimanual::factory::{DeviceFactory, SimFactory, build_follower, build_leader, build_sequencer};
use bimanual::features::{Features, IMAGE_KEY_PREFIX};
use bimanual::operator::{AutoConfirm, ConsoleOperator, Operator};
use hardware::MotorMap;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

    debug!(?level, "Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(id = %config.id, calibration_dir = %config.calibration_dir.display(), "Loaded rig config");

    let factory = if cli.simulate {
        SimFactory::simulate_all()
    } else {
        SimFactory::new()
    };

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Calibrate { yes } => {
            if yes {
                cmd_calibrate(&config, &factory, AutoConfirm::new()).await
            } else {
                cmd_calibrate(&config, &factory, ConsoleOperator).await
            }
        }
        Command::Check { skip_cameras } => cmd_check(&config, &factory, skip_cameras).await,
        Command::Teleop { duration, fps } => cmd_teleop(&config, &factory, duration, fps).await,
        Command::SetupMotors { target } => cmd_setup_motors(&config, &factory, target).await,
        Command::Features { format } => cmd_features(&config, format),
    }
}

/// Run the guided four-arm calibration
async fn cmd_calibrate<O: Operator>(config: &Config, factory: &dyn DeviceFactory, operator: O) -> Result<()> {
    debug!("cmd_calibrate: called");
    let sequencer = build_sequencer(config, factory, operator)?;

    println!("{}", "Bimanual calibration".bold());
    println!("Calibration files: {}", config.calibration_dir.display());
    for step in sequencer.plan().steps() {
        println!("  {} {}", "•".dimmed(), step.role);
    }

    match sequencer.run().await {
        Ok(report) => {
            for role in &report.calibrated {
                println!("{} {} calibrated", "✓".green(), role);
            }
            println!("{}", "All four arms calibrated".green().bold());
            Ok(())
        }
        Err(failure) => {
            println!("{} {} ({})", "✗".red(), failure.error, failure.state);
            Err(eyre!("Calibration failed on {}", failure.role()))
        }
    }
}

/// Connect, read once, hold the current pose, disconnect
async fn cmd_check(config: &Config, factory: &dyn DeviceFactory, skip_cameras: bool) -> Result<()> {
    debug!(skip_cameras, "cmd_check: called");
    let mut config = config.clone();
    if skip_cameras {
        config.follower.cameras = Default::default();
    }

    let mut follower = build_follower(&config, factory)?;
    let result = async {
        follower.connect(false).await?;
        println!("{} connected {}", "✓".green(), follower.id());

        let observation = follower.get_observation().await?;
        for side in Side::BOTH {
            let count = observation.keys().filter(|k| k.starts_with(side.prefix())).count();
            println!("{} {} arm: {} position channels", "✓".green(), side, count);
        }
        let frames = observation.keys().filter(|k| k.starts_with(IMAGE_KEY_PREFIX)).count();
        println!("{} cameras: {} frames", "✓".green(), frames);

        let hold: MotorMap = observation
            .iter()
            .filter_map(|(key, value)| value.as_position().map(|v| (key.clone(), v)))
            .collect();
        let applied = follower.send_action(&hold).await?;
        println!("{} hold action applied to {} channels", "✓".green(), applied.len());
        Ok::<_, eyre::Report>(())
    }
    .await;

    follower.disconnect().await;
    result.context("Hardware check failed")
}

/// Prints a status line once per second of loop time
struct ProgressSink {
    every: u64,
}

impl TickSink for ProgressSink {
    fn record(&mut self, tick: &Tick<'_>) {
        if tick.index % self.every != 0 {
            return;
        }
        let gripper = |side: Side| {
            tick.action
                .get(&format!("{}gripper.pos", side.prefix()))
                .map(|v| format!("{:6.1}", v))
                .unwrap_or_else(|| "     -".to_string())
        };
        println!(
            "tick {:>6}  gripper L {} R {}  {:>4} ms",
            tick.index,
            gripper(Side::Left),
            gripper(Side::Right),
            tick.elapsed.as_millis()
        );
    }
}

/// Mirror leaders onto followers until a bound or Ctrl+C
async fn cmd_teleop(
    config: &Config,
    factory: &dyn DeviceFactory,
    duration: Option<f64>,
    fps: Option<u32>,
) -> Result<()> {
    debug!(?duration, ?fps, "cmd_teleop: called");
    let fps = fps.unwrap_or(config.control.fps);
    let mut control = ControlLoop::new(fps);
    if let Some(secs) = duration.or(config.control.duration_s) {
        control = control.with_duration(duration_from_secs(secs)?);
    }

    let mut leader = build_leader(config, factory)?;
    let mut follower = build_follower(config, factory)?;

    let connected = async {
        leader.connect(true).await?;
        follower.connect(true).await?;
        Ok::<_, eyre::Report>(())
    }
    .await;

    let outcome: Result<Option<LoopStats>> = match connected {
        Ok(()) => {
            println!("{} teleoperating at {} Hz, Ctrl+C to stop", "▶".cyan(), control.fps());
            let mut sink = ProgressSink {
                every: u64::from(control.fps()),
            };
            tokio::select! {
                result = control.run(&mut leader, &mut follower, &mut sink) => result.map(Some).map_err(eyre::Report::from),
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl+C received, stopping teleoperation");
                    Ok(None)
                }
            }
        }
        Err(e) => Err(e),
    };

    follower.disconnect().await;
    leader.disconnect().await;

    match outcome.context("Teleoperation failed")? {
        Some(stats) => println!(
            "{} {} ticks, {} overruns, slowest {} ms",
            "✓".green(),
            stats.ticks,
            stats.overruns,
            stats.max_tick.as_millis()
        ),
        None => println!("{} stopped", "■".yellow()),
    }
    Ok(())
}

async fn cmd_setup_motors(config: &Config, factory: &dyn DeviceFactory, target: SetupTarget) -> Result<()> {
    debug!(%target, "cmd_setup_motors: called");
    match target {
        SetupTarget::Follower => build_follower(config, factory)?.setup_motors().await?,
        SetupTarget::Leader => build_leader(config, factory)?.setup_motors().await?,
    }
    println!("{} {} motor ids assigned", "✓".green(), target);
    Ok(())
}

#[derive(Serialize)]
struct Schema<'a> {
    observation: &'a Features,
    action: &'a Features,
}

/// Print the merged schema; computed from the SO-101 motor set without touching hardware
fn cmd_features(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_features: called");
    let follower = build_follower(config, &SimFactory::simulate_all())?;
    let schema = Schema {
        observation: follower.observation_features(),
        action: follower.action_features(),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&schema).context("Failed to serialize features")?);
        }
        OutputFormat::Text => {
            println!("{}", "Observation".bold());
            for (key, feature) in schema.observation.iter() {
                println!("  {:<40} {}", key, feature);
            }
            println!("{}", "Action".bold());
            for (key, feature) in schema.action.iter() {
                println!("  {:<40} {}", key, feature);
            }
        }
    }
    Ok(())
}
