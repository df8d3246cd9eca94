//! Fixed-rate teleoperation loop
//!
//! Each tick reads the leader pair, forwards the reading to the follower as an
//! action and then reads the follower back. Ticks are driven by a tokio
//! interval; a tick that runs long delays the schedule rather than bursting to
//! catch up.

use std::time::Duration;

use hardware::MotorMap;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::features::Observation;
use crate::follower::BimanualFollower;
use crate::leader::BimanualLeader;

pub const DEFAULT_FPS: u32 = 10;

/// One completed tick
#[derive(Debug)]
pub struct Tick<'a> {
    pub index: u64,
    /// Values the follower actually applied
    pub action: &'a MotorMap,
    pub observation: &'a Observation,
    /// Time spent inside the tick
    pub elapsed: Duration,
}

/// Receives every completed tick
pub trait TickSink {
    fn record(&mut self, tick: &Tick<'_>);
}

/// Drops every tick
#[derive(Debug, Default)]
pub struct Discard;

impl TickSink for Discard {
    fn record(&mut self, _tick: &Tick<'_>) {}
}

/// Loop totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks that took longer than the period
    pub overruns: u64,
    pub max_tick: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLoop {
    fps: u32,
    max_ticks: Option<u64>,
    duration: Option<Duration>,
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

impl ControlLoop {
    /// Unbounded loop at `fps`; zero is treated as one
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            max_ticks: None,
            duration: None,
        }
    }

    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    fn finished(&self, stats: &LoopStats, started: Instant) -> bool {
        if self.max_ticks.is_some_and(|max| stats.ticks >= max) {
            return true;
        }
        self.duration.is_some_and(|d| started.elapsed() >= d)
    }

    /// Run until a bound is reached or a tick fails
    ///
    /// Both devices must already be connected. The loop never disconnects
    /// them; that is left to the caller, including on error.
    pub async fn run<S: TickSink>(
        &self,
        leader: &mut BimanualLeader,
        follower: &mut BimanualFollower,
        sink: &mut S,
    ) -> Result<LoopStats, CoordinatorError> {
        let period = self.period();
        info!(fps = self.fps, max_ticks = ?self.max_ticks, duration = ?self.duration, "Starting control loop");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut stats = LoopStats::default();

        while !self.finished(&stats, started) {
            interval.tick().await;
            let tick_start = Instant::now();

            let action = leader.get_action().await?;
            let sent = follower.send_action(&action).await?;
            let observation = follower.get_observation().await?;

            let elapsed = tick_start.elapsed();
            if elapsed > period {
                stats.overruns += 1;
                warn!(tick = stats.ticks, elapsed_ms = elapsed.as_millis() as u64, "Control tick overran its period");
            }
            stats.max_tick = stats.max_tick.max(elapsed);

            sink.record(&Tick {
                index: stats.ticks,
                action: &sent,
                observation: &observation,
                elapsed,
            });
            debug!(tick = stats.ticks, channel_count = sent.len(), "ControlLoop::run: tick done");
            stats.ticks += 1;
        }

        info!(ticks = stats.ticks, overruns = stats.overruns, "Control loop finished");
        Ok(stats)
    }
}
