// SPDX-License-Identifier: MIT

//! The mutable execution record attached to every Task (spec §3.2, §4.1).

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Legal states of the Task state machine (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    New,
    Submitted,
    Running,
    Stopped,
    Terminating,
    Terminated,
    Unknown,
}

crate::simple_display! {
    State {
        New => "NEW",
        Submitted => "SUBMITTED",
        Running => "RUNNING",
        Stopped => "STOPPED",
        Terminating => "TERMINATING",
        Terminated => "TERMINATED",
        Unknown => "UNKNOWN",
    }
}

impl State {
    /// Whether `self -> to` is a legal transition per spec §4.1. `UNKNOWN`
    /// may move to any state (it represents "we don't know", not a
    /// committed state), and any state may move to `UNKNOWN` when a
    /// Backend fails to answer `update_state`.
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        if self == to {
            return false;
        }
        if self == Unknown || to == Unknown {
            return true;
        }
        match self {
            New => matches!(to, Submitted | Terminated),
            Submitted => matches!(to, Running | Stopped | Terminating | Terminated),
            Running => matches!(to, Stopped | Terminating | Terminated),
            Stopped => matches!(to, Submitted | Terminating | Terminated),
            Terminating => matches!(to, Terminated),
            Terminated => matches!(to, New),
            Unknown => true,
        }
    }

    pub fn is_terminal_for_sweep(self) -> bool {
        matches!(self, State::Terminated)
    }

    pub fn in_flight(self) -> bool {
        matches!(self, State::Submitted | State::Running)
    }
}

/// `(signal, exitcode)` — either may be absent until TERMINATED.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCode {
    pub signal: Option<i32>,
    pub exitcode: Option<i32>,
}

impl ReturnCode {
    pub fn ok(exitcode: i32) -> Self {
        Self { signal: None, exitcode: Some(exitcode) }
    }

    /// `true` iff a (non-signalled) zero exit code was recorded.
    pub fn is_success(&self) -> bool {
        self.signal.is_none() && self.exitcode == Some(0)
    }
}

/// The mutable execution record of a Task (spec §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub state: State,
    pub returncode: ReturnCode,
    pub backend_job_id: Option<String>,
    pub backend_name: Option<String>,
    pub info: String,
    /// Ordered, append-only `(epoch_ms, message)` pairs.
    pub history: Vec<(u64, String)>,
    /// State name -> epoch ms of first entry into that state.
    pub timestamps: HashMap<String, u64>,
    /// Consecutive UNKNOWN polls, used to drive exponential backoff.
    #[serde(default)]
    pub consecutive_unknown: u32,
    /// Epoch ms of the next time this Task is eligible to be polled again.
    #[serde(default)]
    pub next_poll_epoch_ms: u64,
    /// Set by `Core::kill`; consumed by the next `Engine::progress` sweep.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Number of consecutive data-staging failures (spec §7).
    #[serde(default)]
    pub staging_attempts: u32,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            state: State::New,
            returncode: ReturnCode::default(),
            backend_job_id: None,
            backend_name: None,
            info: String::new(),
            history: Vec::new(),
            timestamps: HashMap::new(),
            consecutive_unknown: 0,
            next_poll_epoch_ms: 0,
            cancel_requested: false,
            staging_attempts: 0,
        }
    }
}

/// Outcome of attempting to set a Run's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: State,
    pub to: State,
}

impl Run {
    /// Unconditionally record entry into `to`, regardless of the legality
    /// of the transition — used by the one fast-fail path (NEW -> TERMINATED
    /// on unrecoverable submission error) and by state-machine tests. Most
    /// callers should use [`Run::transition`] instead.
    pub fn force_state(&mut self, to: State, info: impl Into<String>, clock: &impl Clock) {
        let now = clock.epoch_ms();
        self.state = to;
        self.info = info.into();
        self.history.push((now, format!("-> {to}: {}", self.info)));
        self.timestamps.entry(to.to_string()).or_insert(now);
    }

    /// Attempt a legal transition, recording history and a timestamp.
    /// Returns `Err` (transition refused, no mutation performed) if the
    /// move is not legal per [`State::can_transition_to`].
    pub fn transition(
        &mut self,
        to: State,
        info: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<Transition, crate::error::TaskError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(crate::error::TaskError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if to == State::Unknown {
            self.consecutive_unknown += 1;
        } else {
            self.consecutive_unknown = 0;
        }
        self.force_state(to, info, clock);
        Ok(Transition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn new_to_submitted_is_legal() {
        assert!(State::New.can_transition_to(State::Submitted));
        assert!(!State::New.can_transition_to(State::Running));
    }

    #[test]
    fn terminated_only_resubmits() {
        assert!(State::Terminated.can_transition_to(State::New));
        assert!(!State::Terminated.can_transition_to(State::Submitted));
    }

    #[test]
    fn unknown_is_reachable_and_escapable_from_anywhere() {
        assert!(State::Running.can_transition_to(State::Unknown));
        assert!(State::Unknown.can_transition_to(State::Running));
        assert!(State::Unknown.can_transition_to(State::Terminated));
    }

    #[test]
    fn transition_records_history_and_timestamp() {
        let clock = FakeClock::new();
        let mut run = Run::default();
        run.transition(State::Submitted, "submitted to backend", &clock).unwrap();
        assert_eq!(run.state, State::Submitted);
        assert_eq!(run.history.len(), 1);
        assert!(run.timestamps.contains_key("SUBMITTED"));
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let clock = FakeClock::new();
        let mut run = Run::default();
        let err = run.transition(State::Running, "nope", &clock).unwrap_err();
        assert!(matches!(err, crate::error::TaskError::IllegalTransition { .. }));
        assert_eq!(run.state, State::New);
        assert!(run.history.is_empty());
    }

    #[test]
    fn consecutive_unknown_counter_tracks_backoff_state() {
        let clock = FakeClock::new();
        let mut run = Run::default();
        run.transition(State::Submitted, "x", &clock).unwrap();
        run.transition(State::Unknown, "timeout", &clock).unwrap();
        run.transition(State::Unknown, "timeout again", &clock).unwrap();
        assert_eq!(run.consecutive_unknown, 2);
        run.transition(State::Running, "recovered", &clock).unwrap();
        assert_eq!(run.consecutive_unknown, 0);
    }

    #[test]
    fn return_code_success_requires_no_signal() {
        assert!(ReturnCode::ok(0).is_success());
        assert!(!ReturnCode::ok(1).is_success());
        assert!(!ReturnCode { signal: Some(9), exitcode: Some(0) }.is_success());
    }
}
