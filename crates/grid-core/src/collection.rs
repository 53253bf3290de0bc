// SPDX-License-Identifier: MIT

//! TaskCollection variants (spec §3.5) — composite Tasks whose state is
//! *derived* from their children rather than set directly.
//!
//! The original design lets a host program override hook methods
//! (`next()`, `new_task()`, `stage()`, `retry()`) on a subclass. Rust has
//! no subclassing, so each hook becomes a small trait the host implements
//! once and attaches to the collection at runtime; the attached policy is
//! not part of the persisted representation (`#[serde(skip)]`), matching
//! how a Backend adapter is wired up rather than deserialized. A
//! collection with no policy attached falls back to the default behavior
//! documented per variant below, where one exists.

use crate::application::Application;
use crate::graph::TaskGraph;
use crate::id::PersistentId;
use crate::run::{ReturnCode, State};
use crate::task::{Task, TaskCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Roll up children states into the collection's own derived state
/// (spec §3.5: "ALL_TERMINATED and OK" vs "ANY_TERMINATED and not OK").
fn derive_parallel(children: &[State], returncodes: &[ReturnCode]) -> (State, ReturnCode) {
    if children.is_empty() {
        return (State::Terminated, ReturnCode::ok(0));
    }
    if children.iter().any(|s| *s == State::Unknown) {
        return (State::Unknown, ReturnCode::default());
    }
    if children.iter().all(|s| *s == State::Terminated) {
        let worst = returncodes
            .iter()
            .find(|rc| !rc.is_success())
            .copied()
            .unwrap_or_else(|| ReturnCode::ok(0));
        return (State::Terminated, worst);
    }
    if children.iter().any(|s| s.in_flight() || *s == State::Terminating) {
        return (State::Running, ReturnCode::default());
    }
    if children.iter().any(|s| *s == State::Stopped) {
        return (State::Stopped, ReturnCode::default());
    }
    (State::New, ReturnCode::default())
}

/// Run every child concurrently (spec §3.5 ParallelTaskCollection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTaskCollection {
    pub core: TaskCore,
    pub children: Vec<PersistentId>,
}

impl ParallelTaskCollection {
    pub fn new(jobname: impl Into<String>, children: Vec<PersistentId>) -> Self {
        Self { core: TaskCore::new(jobname), children }
    }

    /// All children are active in every sweep.
    pub fn active_children(&self) -> &[PersistentId] {
        &self.children
    }

    pub fn recompute_state(&self, graph: &TaskGraph) -> (State, ReturnCode) {
        let states: Vec<State> = self.children.iter().map(|id| graph.state_of(id)).collect();
        let codes: Vec<ReturnCode> =
            self.children.iter().map(|id| graph.returncode_of(id)).collect();
        derive_parallel(&states, &codes)
    }
}

/// Decision returned by a [`SequentialPolicy`] after a child terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequentialDecision {
    /// Move on to the child at this index (must already exist in `children`).
    Advance(usize),
    /// Insert these new children right after the current one, then advance
    /// into the first of them.
    Extend(Vec<Application>),
    /// No more work; the collection itself terminates with this code.
    Done(ReturnCode),
}

/// Host-supplied policy for [`SequentialTaskCollection`] (spec §3.5:
/// "the `next()` hook decides whether to advance, insert, or stop").
pub trait SequentialPolicy: Send + Sync {
    fn next(&self, done_index: usize, children: &[PersistentId], last: ReturnCode) -> SequentialDecision;
}

/// Default policy: advance one at a time, stop at the first failure,
/// otherwise succeed once every child has run.
pub struct DefaultSequentialPolicy;

impl SequentialPolicy for DefaultSequentialPolicy {
    fn next(&self, done_index: usize, children: &[PersistentId], last: ReturnCode) -> SequentialDecision {
        if !last.is_success() {
            return SequentialDecision::Done(last);
        }
        if done_index + 1 < children.len() {
            SequentialDecision::Advance(done_index + 1)
        } else {
            SequentialDecision::Done(last)
        }
    }
}

/// Run children one at a time in order (spec §3.5 SequentialTaskCollection).
#[derive(Clone, Serialize, Deserialize)]
pub struct SequentialTaskCollection {
    pub core: TaskCore,
    pub children: Vec<PersistentId>,
    pub current: usize,
    #[serde(skip)]
    pub policy: Option<Arc<dyn SequentialPolicy>>,
}

impl std::fmt::Debug for SequentialTaskCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialTaskCollection")
            .field("core", &self.core)
            .field("children", &self.children)
            .field("current", &self.current)
            .finish()
    }
}

impl SequentialTaskCollection {
    pub fn new(jobname: impl Into<String>, children: Vec<PersistentId>) -> Self {
        Self { core: TaskCore::new(jobname), children, current: 0, policy: None }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SequentialPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Only the task at `current` is schedulable this sweep.
    pub fn active_children(&self) -> &[PersistentId] {
        if self.current < self.children.len() {
            &self.children[self.current..=self.current]
        } else {
            &[]
        }
    }

    pub fn recompute_state(&self, graph: &TaskGraph) -> (State, ReturnCode) {
        if self.children.is_empty() {
            return (State::Terminated, ReturnCode::ok(0));
        }
        if self.current >= self.children.len() {
            let last = graph.returncode_of(&self.children[self.children.len() - 1]);
            return (State::Terminated, last);
        }
        let cur_state = graph.state_of(&self.children[self.current]);
        match cur_state {
            State::Unknown => (State::Unknown, ReturnCode::default()),
            State::Terminated if self.current + 1 >= self.children.len() => {
                (State::Terminated, graph.returncode_of(&self.children[self.current]))
            }
            State::Terminated => (State::Running, ReturnCode::default()),
            s if s.in_flight() || s == State::Terminating => (State::Running, ReturnCode::default()),
            State::Stopped => (State::Stopped, ReturnCode::default()),
            _ => (State::New, ReturnCode::default()),
        }
    }
}

/// Host-supplied materializer for [`StagedTaskCollection`] (spec §3.5:
/// stages are produced lazily, one at a time, because later stages may
/// depend on the output of earlier ones).
pub trait StagePolicy: Send + Sync {
    /// Produce the Nth stage (0-based), given the previous stage's Task if
    /// any. Returning `None` ends the pipeline successfully.
    fn stage(&self, n: usize, previous: Option<&Task>) -> Option<Task>;
}

/// A pipeline of lazily-materialized stages (spec §3.5 StagedTaskCollection).
/// Distinct from SequentialTaskCollection in that children are not known
/// up front: `stageN()` is called only once the previous stage terminates.
#[derive(Clone, Serialize, Deserialize)]
pub struct StagedTaskCollection {
    pub core: TaskCore,
    pub stages: Vec<PersistentId>,
    /// Set once `policy.stage()` returns `None`: the pipeline is complete
    /// and its own state should stop tracking the last stage's state.
    #[serde(default)]
    pub done: bool,
    #[serde(skip)]
    pub policy: Option<Arc<dyn StagePolicy>>,
}

impl std::fmt::Debug for StagedTaskCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedTaskCollection")
            .field("core", &self.core)
            .field("stages", &self.stages)
            .finish()
    }
}

impl StagedTaskCollection {
    pub fn new(jobname: impl Into<String>) -> Self {
        Self { core: TaskCore::new(jobname), stages: Vec::new(), done: false, policy: None }
    }

    pub fn with_policy(mut self, policy: Arc<dyn StagePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn active_children(&self) -> &[PersistentId] {
        match self.stages.last() {
            Some(id) => std::slice::from_ref(id),
            None => &[],
        }
    }

    pub fn children(&self) -> &[PersistentId] {
        &self.stages
    }

    /// A successfully-TERMINATED last stage leaves the pipeline `RUNNING`
    /// until the Engine has asked `policy.stage()` for the next one and
    /// either materialized it or set [`StagedTaskCollection::done`] — a
    /// stage terminating is not, by itself, proof the pipeline is over.
    pub fn recompute_state(&self, graph: &TaskGraph) -> (State, ReturnCode) {
        match self.stages.last() {
            None => (State::New, ReturnCode::default()),
            Some(last_id) => {
                let s = graph.state_of(last_id);
                let rc = graph.returncode_of(last_id);
                match s {
                    State::Unknown => (State::Unknown, ReturnCode::default()),
                    State::Terminated if !rc.is_success() => (State::Terminated, rc),
                    State::Terminated if self.done => (State::Terminated, rc),
                    State::Terminated => (State::Running, ReturnCode::default()),
                    s if s.in_flight() || s == State::Terminating => {
                        (State::Running, ReturnCode::default())
                    }
                    State::Stopped => (State::Stopped, ReturnCode::default()),
                    _ => (State::New, ReturnCode::default()),
                }
            }
        }
    }
}

/// Host-supplied leaf-task constructor for [`ChunkedParameterSweep`] (spec
/// §3.5: "new_task(n) builds the Application for parameter value n").
pub trait SweepPolicy: Send + Sync {
    fn new_task(&self, param: i64) -> Application;
}

/// A parameter sweep materialized in bounded-size chunks so that an
/// unbounded range never creates unbounded pending children at once
/// (spec §3.5 ChunkedParameterSweep).
#[derive(Clone, Serialize, Deserialize)]
pub struct ChunkedParameterSweep {
    pub core: TaskCore,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub chunk_size: usize,
    pub next_param: i64,
    pub children: Vec<PersistentId>,
    #[serde(skip)]
    pub policy: Option<Arc<dyn SweepPolicy>>,
}

impl std::fmt::Debug for ChunkedParameterSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedParameterSweep")
            .field("core", &self.core)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("chunk_size", &self.chunk_size)
            .field("next_param", &self.next_param)
            .field("children", &self.children)
            .finish()
    }
}

impl ChunkedParameterSweep {
    pub fn new(jobname: impl Into<String>, min: i64, max: i64, step: i64, chunk_size: usize) -> Self {
        Self {
            core: TaskCore::new(jobname),
            min,
            max,
            step,
            chunk_size,
            next_param: min,
            children: Vec::new(),
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SweepPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Whether the full [min, max) range has been materialized.
    pub fn exhausted(&self) -> bool {
        self.next_param >= self.max
    }

    /// All currently-materialized, not-yet-terminated children are active;
    /// the Engine grows the window by calling [`ChunkedParameterSweep::grow`]
    /// when fewer than `chunk_size` are in flight and the range isn't
    /// exhausted.
    pub fn active_children(&self) -> &[PersistentId] {
        &self.children
    }

    pub fn recompute_state(&self, graph: &TaskGraph) -> (State, ReturnCode) {
        if self.children.is_empty() && self.exhausted() {
            return (State::Terminated, ReturnCode::ok(0));
        }
        let states: Vec<State> = self.children.iter().map(|id| graph.state_of(id)).collect();
        if !self.exhausted() {
            if states.iter().any(|s| *s == State::Unknown) {
                return (State::Unknown, ReturnCode::default());
            }
            if states.iter().any(|s| s.in_flight()) || !self.exhausted() {
                return (State::Running, ReturnCode::default());
            }
        }
        let codes: Vec<ReturnCode> =
            self.children.iter().map(|id| graph.returncode_of(id)).collect();
        derive_parallel(&states, &codes)
    }
}

/// Host-supplied predicate deciding whether a failed attempt should be
/// retried (spec §3.5 RetryableTask).
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, last_returncode: ReturnCode) -> bool;
}

/// Default policy: retry up to `max_retries` times on any non-zero exit.
pub struct MaxRetries(pub u32);

impl RetryPolicy for MaxRetries {
    fn should_retry(&self, attempt: u32, last_returncode: ReturnCode) -> bool {
        attempt < self.0 && !last_returncode.is_success()
    }
}

/// Wraps a single child, resubmitting it (as a fresh child Task) on
/// failure up to a policy-defined limit (spec §3.5 RetryableTask).
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryableTask {
    pub core: TaskCore,
    pub children: Vec<PersistentId>,
    pub attempt: u32,
    /// Set once the latest attempt succeeded or `policy.should_retry()`
    /// declined another attempt — the final word, since a failed-but-not-
    /// yet-judged attempt must not be read as the wrapper's final state.
    #[serde(default)]
    pub done: bool,
    #[serde(skip)]
    pub policy: Option<Arc<dyn RetryPolicy>>,
}

impl std::fmt::Debug for RetryableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableTask")
            .field("core", &self.core)
            .field("children", &self.children)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl RetryableTask {
    pub fn new(jobname: impl Into<String>, first_attempt: PersistentId) -> Self {
        Self {
            core: TaskCore::new(jobname),
            children: vec![first_attempt],
            attempt: 0,
            done: false,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn active_children(&self) -> &[PersistentId] {
        match self.children.last() {
            Some(id) => std::slice::from_ref(id),
            None => &[],
        }
    }

    /// A TERMINATED latest attempt leaves the wrapper `RUNNING` until the
    /// Engine has consulted `policy.should_retry()` and either queued a
    /// fresh attempt or set [`RetryableTask::done`].
    pub fn recompute_state(&self, graph: &TaskGraph) -> (State, ReturnCode) {
        match self.children.last() {
            None => (State::New, ReturnCode::default()),
            Some(id) => {
                let s = graph.state_of(id);
                let rc = graph.returncode_of(id);
                match s {
                    State::Unknown => (State::Unknown, ReturnCode::default()),
                    s if s.in_flight() || s == State::Terminating => {
                        (State::Running, ReturnCode::default())
                    }
                    State::Terminated if !self.done => (State::Running, ReturnCode::default()),
                    _ => (s, rc),
                }
            }
        }
    }
}
