//! Shared observation/fault handle for simulated devices

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Operations a simulated device records in its journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Connect,
    Calibrate,
    Configure,
    SetupMotors,
    GetObservation,
    SendAction,
    DisableTorque,
    ReadFrame,
    Disconnect,
}

impl std::fmt::Display for SimOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Calibrate => write!(f, "calibrate"),
            Self::Configure => write!(f, "configure"),
            Self::SetupMotors => write!(f, "setup_motors"),
            Self::GetObservation => write!(f, "get_observation"),
            Self::SendAction => write!(f, "send_action"),
            Self::DisableTorque => write!(f, "disable_torque"),
            Self::ReadFrame => write!(f, "read_frame"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    connected: bool,
    journal: Vec<SimOp>,
    faults: VecDeque<SimOp>,
}

/// Cloneable view onto a simulated device
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl SimProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProbeState> {
        // A panicking test thread must not hide the journal from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Journal `op`; returns true when an armed fault for `op` was consumed
    pub(crate) fn record(&self, op: SimOp) -> bool {
        let mut state = self.state();
        state.journal.push(op);
        if let Some(pos) = state.faults.iter().position(|f| *f == op) {
            state.faults.remove(pos);
            debug!(%op, "SimProbe::record: injecting fault");
            return true;
        }
        false
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: SimOp) {
        debug!(%op, "SimProbe::fail_next: called");
        self.state().faults.push_back(op);
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Force the link state, as if the cable were pulled or replugged
    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Every recorded call, oldest first
    pub fn calls(&self) -> Vec<SimOp> {
        self.state().journal.clone()
    }

    pub fn count(&self, op: SimOp) -> usize {
        self.state().journal.iter().filter(|o| **o == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().journal.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_is_one_shot() {
        let probe = SimProbe::new();
        probe.fail_next(SimOp::Connect);

        assert!(!probe.record(SimOp::Calibrate));
        assert!(probe.record(SimOp::Connect));
        assert!(!probe.record(SimOp::Connect));

        assert_eq!(probe.count(SimOp::Connect), 2);
        assert_eq!(probe.calls().len(), 3);
    }

    #[test]
    fn test_clones_share_state() {
        let probe = SimProbe::new();
        let other = probe.clone();

        other.set_connected(true);
        assert!(probe.is_connected());

        probe.record(SimOp::Disconnect);
        assert_eq!(other.calls(), vec![SimOp::Disconnect]);

        other.clear_calls();
        assert!(probe.calls().is_empty());
    }
}
