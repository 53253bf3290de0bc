// SPDX-License-Identifier: MIT

//! [`Engine`] — the cooperative scheduler driving many Tasks through
//! their state machines under concurrency caps (spec §4.5). Builds on
//! [`crate::core::Core`]: each `progress()` sweep picks the currently
//! schedulable leaves (via `TaskGraph::active_closure`), advances each by
//! at most one state-changing action, then recomputes every collection's
//! derived state bottom-up before committing changed Tasks to the Store.

use crate::core::Core;
use crate::error::EngineError;
use chrono::DateTime;
use grid_core::application::substitute_output_dir;
use grid_core::{
    Application, Backend, Clock, Persistable, PersistentId, State, SystemClock, Task, TaskGraph,
};
use grid_store::{Store, TaskHandle};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

/// Tunable caps and cadences for [`Engine::progress`] (spec §4.5, §5).
/// No config-file parsing is in scope; a host program constructs this
/// directly or starts from [`EngineConfig::default`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max Tasks concurrently in SUBMITTED/RUNNING across the whole Engine.
    pub max_in_flight: u32,
    /// Max NEW -> SUBMITTED transitions attempted in a single sweep.
    pub max_submitted: u32,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Whether `progress()` should call `Core::free` on a TERMINATED Task
    /// the first sweep it observes it, releasing backend-side resources
    /// without the host having to do so explicitly (spec §4.5).
    pub auto_free: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 32,
            max_submitted: 8,
            poll_interval_ms: 2_000,
            max_backoff_ms: 60_000,
            auto_free: true,
        }
    }
}

/// The bitfield exit-code convention for a CLI wrapper around the core
/// (spec §6): bit 0 fatal error (set by the host, not derivable from the
/// graph alone), bit 1 a FAILED terminal Task, bit 2 a SUBMITTED/RUNNING
/// Task, bit 3 a NEW Task.
pub fn exit_code_for(graph: &TaskGraph) -> u8 {
    let mut code = 0u8;
    for task in graph.values() {
        match task.state() {
            State::Terminated if !task.run().returncode.is_success() => code |= 0b0010,
            State::Submitted | State::Running => code |= 0b0100,
            State::New => code |= 0b1000,
            _ => {}
        }
    }
    code
}

pub struct Engine<S: Store, C: Clock = SystemClock> {
    graph: TaskGraph,
    roots: Vec<PersistentId>,
    core: Core,
    store: S,
    clock: C,
    config: EngineConfig,
    session_dir: PathBuf,
}

impl<S: Store> Engine<S, SystemClock> {
    pub fn new(
        store: S,
        backends: Vec<Arc<dyn Backend>>,
        session_dir: impl Into<PathBuf>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(store, backends, session_dir, config, SystemClock)
    }
}

impl<S: Store, C: Clock> Engine<S, C> {
    pub fn with_clock(
        store: S,
        backends: Vec<Arc<dyn Backend>>,
        session_dir: impl Into<PathBuf>,
        config: EngineConfig,
        clock: C,
    ) -> Self {
        Self {
            graph: TaskGraph::new(),
            roots: Vec::new(),
            core: Core::new(backends),
            store,
            clock,
            config,
            session_dir: session_dir.into(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Persist `task` (assigning it a fresh id via the Store's IdFactory),
    /// add it to the in-memory graph, and manage it as a sweep root.
    pub fn add_root(&mut self, task: Task) -> Result<PersistentId, EngineError> {
        let id = self.add_task(task)?;
        self.roots.push(id.clone());
        Ok(id)
    }

    /// Persist and graph a Task without tracking it as a sweep root
    /// (used for the children of a collection the caller is building).
    pub fn add_task(&mut self, task: Task) -> Result<PersistentId, EngineError> {
        let handle: TaskHandle = Arc::new(RwLock::new(task));
        let id = self.store.save(&handle)?;
        let task = handle.read().clone();
        self.graph.insert(task);
        Ok(id)
    }

    /// Load `root_id` and every descendant from the Store into the graph
    /// and start managing it as a sweep root (spec §8 scenario 5: a
    /// restarted process continuing a Session's unfinished Tasks).
    pub fn load(&mut self, root_id: PersistentId) -> Result<(), EngineError> {
        self.load_recursive(&root_id)?;
        self.roots.push(root_id);
        Ok(())
    }

    fn load_recursive(&mut self, id: &PersistentId) -> Result<(), EngineError> {
        if self.graph.contains(id) {
            return Ok(());
        }
        let handle = self.store.get_or_load(id)?;
        let task = handle.read().clone();
        let children: Vec<PersistentId> = task.children().to_vec();
        self.graph.insert(task);
        for child in children {
            self.load_recursive(&child)?;
        }
        Ok(())
    }

    /// Record a cooperative cancellation request, acted on next sweep.
    pub fn kill_task(&mut self, id: &PersistentId) {
        if let Some(task) = self.graph.get_mut(id) {
            task.core_mut().run.cancel_requested = true;
            task.core_mut().mark_changed();
        }
    }

    /// Run one sweep: let every collection react to children that
    /// terminated since the last sweep (advance a Sequential's cursor,
    /// materialize the next Staged stage, grow a Chunked window, queue a
    /// Retryable's next attempt), advance every currently-active leaf by
    /// at most one state-changing action, recompute every collection's
    /// derived state bottom-up, then commit changed Tasks to the Store.
    pub async fn progress(&mut self) -> Result<(), EngineError> {
        self.advance_collections()?;

        let mut active_ids = Vec::new();
        for root in self.roots.clone() {
            self.graph.active_closure(&root, &mut active_ids);
        }
        active_ids.sort();
        active_ids.dedup();

        let mut in_flight = self.count_in_flight();
        let mut submitted_this_sweep = 0u32;
        for id in &active_ids {
            self.advance_one(id, &mut in_flight, &mut submitted_this_sweep).await?;
        }

        loop {
            let mut changed_any = false;
            let ids: Vec<PersistentId> = self.graph.ids().cloned().collect();
            for id in ids {
                if self.graph.recompute_derived_state(&id) {
                    changed_any = true;
                }
            }
            if !changed_any {
                break;
            }
        }

        self.commit_changed()?;
        Ok(())
    }

    fn count_in_flight(&self) -> u32 {
        self.graph.values().filter(|t| t.state().in_flight()).count() as u32
    }

    async fn advance_one(
        &mut self,
        id: &PersistentId,
        in_flight: &mut u32,
        submitted_this_sweep: &mut u32,
    ) -> Result<(), EngineError> {
        let Some((state, cancel_requested)) =
            self.graph.get(id).map(|t| (t.state(), t.run().cancel_requested))
        else {
            return Ok(());
        };

        if cancel_requested && state.in_flight() {
            let core = &self.core;
            let clock = &self.clock;
            if let Some(task) = self.graph.get_mut(id) {
                core.kill(task, clock).await?;
            }
            return Ok(());
        }

        match state {
            State::New => {
                if *in_flight >= self.config.max_in_flight
                    || *submitted_this_sweep >= self.config.max_submitted
                {
                    return Ok(());
                }
                let output_dir = self.resolve_output_dir(id);
                let core = &self.core;
                let clock = &self.clock;
                let submitted = if let Some(task) = self.graph.get_mut(id) {
                    core.submit(task, &output_dir, clock).await?
                } else {
                    false
                };
                if submitted {
                    *in_flight += 1;
                    *submitted_this_sweep += 1;
                }
            }
            State::Submitted | State::Running | State::Unknown => {
                let next_poll = self.graph.get(id).map(|t| t.run().next_poll_epoch_ms).unwrap_or(0);
                let now = self.clock.epoch_ms();
                if now < next_poll {
                    return Ok(());
                }
                let core = &self.core;
                let clock = &self.clock;
                if let Some(task) = self.graph.get_mut(id) {
                    core.update_job_state(task, clock).await?;
                }
                if let Some(task) = self.graph.get_mut(id) {
                    let consecutive = task.run().consecutive_unknown;
                    let backoff = backoff_ms(&self.config, consecutive);
                    task.core_mut().run.next_poll_epoch_ms = now + backoff;
                }
            }
            State::Terminating => {
                let dest_dir = self.resolve_output_dir(id);
                let core = &self.core;
                let clock = &self.clock;
                if let Some(task) = self.graph.get_mut(id) {
                    core.fetch_output(task, &dest_dir, true, clock).await?;
                }
            }
            State::Terminated if self.config.auto_free => {
                let core = &self.core;
                if let Some(task) = self.graph.get_mut(id) {
                    core.free(task).await?;
                }
            }
            State::Stopped | State::Terminated => {}
        }
        Ok(())
    }

    fn resolve_output_dir(&self, id: &PersistentId) -> PathBuf {
        let Some(Task::Application(app, core)) = self.graph.get(id) else {
            return self.session_dir.clone();
        };
        let (date, time) = format_date_time(self.clock.epoch_ms());
        let session_name =
            self.session_dir.file_name().and_then(|n| n.to_str()).unwrap_or("session").to_string();
        let resolved = substitute_output_dir(
            &app.output_dir,
            &self.session_dir.display().to_string(),
            &core.jobname,
            &date,
            &time,
            &session_name,
        );
        PathBuf::from(resolved)
    }

    fn commit_changed(&mut self) -> Result<(), EngineError> {
        let changed_ids: Vec<PersistentId> = self
            .graph
            .values()
            .filter(|t| t.is_changed())
            .filter_map(|t| t.persistent_id().cloned())
            .collect();
        for id in changed_ids {
            if let Some(task) = self.graph.get(&id) {
                let handle: TaskHandle = Arc::new(RwLock::new(task.clone()));
                self.store.save(&handle)?;
            }
            if let Some(task) = self.graph.get_mut(&id) {
                task.clear_changed();
            }
        }
        Ok(())
    }

    /// Decide, read-only, what each collection needs done this sweep, then
    /// apply every decision. Split into two passes because applying a
    /// decision may call `add_task` (which needs `&mut self.store`) while
    /// deciding only needs `&self.graph` — kept separate to avoid an
    /// overlapping-borrow conflict between the two.
    fn advance_collections(&mut self) -> Result<(), EngineError> {
        let decisions = self.plan_collection_advances();
        for decision in decisions {
            self.apply_collection_advance(decision)?;
        }
        Ok(())
    }

    fn plan_collection_advances(&self) -> Vec<CollectionAdvance> {
        let mut decisions = Vec::new();
        for id in self.graph.ids() {
            let Some(task) = self.graph.get(id) else { continue };
            match task {
                Task::Sequential(coll) => {
                    if coll.current >= coll.children.len() {
                        continue;
                    }
                    let cur = &coll.children[coll.current];
                    if self.graph.state_of(cur) != State::Terminated {
                        continue;
                    }
                    let rc = self.graph.returncode_of(cur);
                    let policy = coll
                        .policy
                        .clone()
                        .unwrap_or_else(|| Arc::new(grid_core::DefaultSequentialPolicy));
                    match policy.next(coll.current, &coll.children, rc) {
                        grid_core::SequentialDecision::Advance(i) => {
                            decisions.push(CollectionAdvance::SeqAdvance(id.clone(), i));
                        }
                        grid_core::SequentialDecision::Extend(apps) => {
                            decisions.push(CollectionAdvance::SeqExtend(id.clone(), apps));
                        }
                        grid_core::SequentialDecision::Done(_) => {
                            decisions.push(CollectionAdvance::SeqDone(id.clone()));
                        }
                    }
                }
                Task::Staged(coll) => {
                    if coll.done {
                        continue;
                    }
                    let Some(policy) = coll.policy.clone() else { continue };
                    match coll.stages.last() {
                        None => match policy.stage(0, None) {
                            Some(task) => {
                                decisions.push(CollectionAdvance::StagedMaterialize(id.clone(), task))
                            }
                            None => decisions.push(CollectionAdvance::StagedDone(id.clone())),
                        },
                        Some(last_id) => {
                            if self.graph.state_of(last_id) != State::Terminated {
                                continue;
                            }
                            if !self.graph.returncode_of(last_id).is_success() {
                                continue;
                            }
                            let previous = self.graph.get(last_id);
                            match policy.stage(coll.stages.len(), previous) {
                                Some(task) => decisions
                                    .push(CollectionAdvance::StagedMaterialize(id.clone(), task)),
                                None => decisions.push(CollectionAdvance::StagedDone(id.clone())),
                            }
                        }
                    }
                }
                Task::Chunked(sweep) => {
                    if sweep.exhausted() {
                        continue;
                    }
                    let Some(policy) = sweep.policy.clone() else { continue };
                    let pending = sweep
                        .children
                        .iter()
                        .filter(|cid| self.graph.state_of(cid) != State::Terminated)
                        .count();
                    if pending >= sweep.chunk_size {
                        continue;
                    }
                    let want = sweep.chunk_size - pending;
                    let mut params = Vec::new();
                    let mut next = sweep.next_param;
                    while params.len() < want && next < sweep.max {
                        params.push(next);
                        next += sweep.step;
                    }
                    if !params.is_empty() {
                        let apps = params.iter().map(|p| policy.new_task(*p)).collect();
                        decisions.push(CollectionAdvance::ChunkedGrow(id.clone(), apps));
                    }
                }
                Task::Retryable(r) => {
                    if r.done {
                        continue;
                    }
                    let Some(last_id) = r.children.last() else { continue };
                    if self.graph.state_of(last_id) != State::Terminated {
                        continue;
                    }
                    let rc = self.graph.returncode_of(last_id);
                    if rc.is_success() {
                        decisions.push(CollectionAdvance::RetryDone(id.clone()));
                        continue;
                    }
                    let policy =
                        r.policy.clone().unwrap_or_else(|| Arc::new(grid_core::MaxRetries(0)));
                    if policy.should_retry(r.attempt, rc) {
                        if let Some(Task::Application(app, _)) = self.graph.get(last_id) {
                            decisions.push(CollectionAdvance::RetryAgain(id.clone(), app.clone()));
                        }
                    } else {
                        decisions.push(CollectionAdvance::RetryDone(id.clone()));
                    }
                }
                Task::Parallel(_) | Task::Application(..) => {}
            }
        }
        decisions
    }

    fn apply_collection_advance(&mut self, decision: CollectionAdvance) -> Result<(), EngineError> {
        match decision {
            CollectionAdvance::SeqAdvance(cid, idx) => {
                if let Some(Task::Sequential(coll)) = self.graph.get_mut(&cid) {
                    coll.current = idx;
                    coll.core.mark_changed();
                }
            }
            CollectionAdvance::SeqExtend(cid, apps) => {
                let jobname = self.graph.get(&cid).map(|t| t.core().jobname.clone()).unwrap_or_default();
                let mut new_ids = Vec::new();
                for (i, app) in apps.into_iter().enumerate() {
                    let mut task = Task::new_application(format!("{jobname}-ext{i}"), app);
                    task.core_mut().parent = Some(cid.clone());
                    new_ids.push(self.add_task(task)?);
                }
                if let Some(Task::Sequential(coll)) = self.graph.get_mut(&cid) {
                    let insert_at = coll.current + 1;
                    for (offset, nid) in new_ids.into_iter().enumerate() {
                        coll.children.insert(insert_at + offset, nid);
                    }
                    coll.current = insert_at;
                    coll.core.mark_changed();
                }
            }
            CollectionAdvance::SeqDone(cid) => {
                if let Some(Task::Sequential(coll)) = self.graph.get_mut(&cid) {
                    coll.current = coll.children.len();
                    coll.core.mark_changed();
                }
            }
            CollectionAdvance::StagedMaterialize(cid, mut task) => {
                task.core_mut().parent = Some(cid.clone());
                let new_id = self.add_task(task)?;
                if let Some(Task::Staged(coll)) = self.graph.get_mut(&cid) {
                    coll.stages.push(new_id);
                    coll.core.mark_changed();
                }
            }
            CollectionAdvance::StagedDone(cid) => {
                if let Some(Task::Staged(coll)) = self.graph.get_mut(&cid) {
                    coll.done = true;
                    coll.core.mark_changed();
                }
            }
            CollectionAdvance::ChunkedGrow(cid, apps) => {
                let jobname = self.graph.get(&cid).map(|t| t.core().jobname.clone()).unwrap_or_default();
                let mut new_ids = Vec::new();
                for (i, app) in apps.into_iter().enumerate() {
                    let mut task = Task::new_application(format!("{jobname}-{i}"), app);
                    task.core_mut().parent = Some(cid.clone());
                    new_ids.push(self.add_task(task)?);
                }
                if let Some(Task::Chunked(sweep)) = self.graph.get_mut(&cid) {
                    let grown = new_ids.len() as i64;
                    sweep.children.extend(new_ids);
                    sweep.next_param += grown * sweep.step;
                    sweep.core.mark_changed();
                }
            }
            CollectionAdvance::RetryAgain(cid, app) => {
                let jobname = self.graph.get(&cid).map(|t| t.core().jobname.clone()).unwrap_or_default();
                let mut task = Task::new_application(jobname, app);
                task.core_mut().parent = Some(cid.clone());
                let new_id = self.add_task(task)?;
                if let Some(Task::Retryable(r)) = self.graph.get_mut(&cid) {
                    r.children.push(new_id);
                    r.attempt += 1;
                    r.core.mark_changed();
                }
            }
            CollectionAdvance::RetryDone(cid) => {
                if let Some(Task::Retryable(r)) = self.graph.get_mut(&cid) {
                    r.done = true;
                    r.core.mark_changed();
                }
            }
        }
        Ok(())
    }
}

/// A read-only decision computed by [`Engine::plan_collection_advances`]
/// and carried out by [`Engine::apply_collection_advance`]; kept as data
/// rather than applied inline so the planning pass only ever needs
/// `&TaskGraph`, never `&mut self`.
enum CollectionAdvance {
    SeqAdvance(PersistentId, usize),
    SeqExtend(PersistentId, Vec<Application>),
    SeqDone(PersistentId),
    StagedMaterialize(PersistentId, Task),
    StagedDone(PersistentId),
    ChunkedGrow(PersistentId, Vec<Application>),
    RetryAgain(PersistentId, Application),
    RetryDone(PersistentId),
}

fn backoff_ms(config: &EngineConfig, consecutive_unknown: u32) -> u64 {
    if consecutive_unknown == 0 {
        return config.poll_interval_ms;
    }
    let shift = consecutive_unknown.min(10);
    config.poll_interval_ms.saturating_mul(1u64 << shift).min(config.max_backoff_ms)
}

fn format_date_time(epoch_ms: u64) -> (String, String) {
    let secs = (epoch_ms / 1000) as i64;
    let dt = DateTime::from_timestamp(secs, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap_or_else(chrono::Utc::now));
    (dt.format("%Y-%m-%d").to_string(), dt.format("%H%M%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_backends::FakeBackend;
    use grid_core::{
        Application, ChunkedParameterSweep, FakeClock, MaxRetries, PolledState, ReturnCode,
        RetryableTask, SequentialTaskCollection, StagePolicy, StagedTaskCollection, SweepPolicy,
    };
    use grid_store::fs::FilesystemStore;
    use std::path::Path;

    fn store(dir: &Path) -> FilesystemStore {
        FilesystemStore::open(dir.join("jobs")).unwrap()
    }

    fn engine(dir: &Path, backend: Arc<dyn Backend>) -> Engine<FilesystemStore, FakeClock> {
        Engine::with_clock(
            store(dir),
            vec![backend],
            dir.to_path_buf(),
            EngineConfig::default(),
            FakeClock::new(),
        )
    }

    #[tokio::test]
    async fn a_new_task_is_submitted_on_the_first_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend);
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = engine.add_root(Task::new_application("t", app)).unwrap();

        engine.progress().await.unwrap();

        assert_eq!(engine.graph().state_of(&id), State::Submitted);
    }

    #[tokio::test]
    async fn a_submitted_task_terminates_once_the_backend_reports_it_done() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend);
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = engine.add_root(Task::new_application("t", app)).unwrap();

        engine.progress().await.unwrap();
        assert_eq!(engine.graph().state_of(&id), State::Submitted);

        // FakeBackend::update_state defaults to reporting Terminated.
        engine.progress().await.unwrap();
        assert_eq!(engine.graph().state_of(&id), State::Terminating);

        engine.progress().await.unwrap();
        assert_eq!(engine.graph().state_of(&id), State::Terminated);
    }

    #[tokio::test]
    async fn auto_free_releases_backend_resources_once_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend.clone());
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = engine.add_root(Task::new_application("t", app)).unwrap();

        for _ in 0..4 {
            engine.progress().await.unwrap();
        }

        assert_eq!(engine.graph().state_of(&id), State::Terminated);
        let free_calls =
            backend.calls().into_iter().filter(|c| matches!(c, grid_backends::Call::Free { .. })).count();
        assert_eq!(free_calls, 1, "free should run exactly once after termination");
    }

    #[tokio::test]
    async fn auto_free_disabled_never_calls_free() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut config = EngineConfig::default();
        config.auto_free = false;
        let mut engine = Engine::with_clock(
            store(dir.path()),
            vec![backend.clone()],
            dir.path().to_path_buf(),
            config,
            FakeClock::new(),
        );
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = engine.add_root(Task::new_application("t", app)).unwrap();

        for _ in 0..4 {
            engine.progress().await.unwrap();
        }

        assert_eq!(engine.graph().state_of(&id), State::Terminated);
        let free_calls =
            backend.calls().into_iter().filter(|c| matches!(c, grid_backends::Call::Free { .. })).count();
        assert_eq!(free_calls, 0);
    }

    #[tokio::test]
    async fn max_submitted_caps_new_to_submitted_transitions_per_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local").with_free_slots(10);
        let mut config = EngineConfig::default();
        config.max_submitted = 1;
        let mut engine = Engine::with_clock(
            store(dir.path()),
            vec![backend],
            dir.path().to_path_buf(),
            config,
            FakeClock::new(),
        );
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let app = Application::builder(vec!["/bin/true"]).build().unwrap();
                engine.add_root(Task::new_application(format!("t{i}"), app)).unwrap()
            })
            .collect();

        engine.progress().await.unwrap();

        let submitted = ids.iter().filter(|id| engine.graph().state_of(id) == State::Submitted).count();
        assert_eq!(submitted, 1);
    }

    #[tokio::test]
    async fn kill_task_cancels_an_in_flight_task_on_the_next_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend);
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = engine.add_root(Task::new_application("t", app)).unwrap();
        engine.progress().await.unwrap();
        assert_eq!(engine.graph().state_of(&id), State::Submitted);

        engine.kill_task(&id);
        engine.progress().await.unwrap();

        assert_eq!(engine.graph().state_of(&id), State::Terminating);
    }

    #[test]
    fn exit_code_reports_new_tasks_present() {
        let mut graph = TaskGraph::new();
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        graph.insert(Task::new_application("t", app));
        assert_eq!(exit_code_for(&graph) & 0b1000, 0b1000);
    }

    #[test]
    fn exit_code_reports_failed_terminated_tasks() {
        let mut graph = TaskGraph::new();
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = graph.insert(Task::new_application("t", app));
        let clock = FakeClock::new();
        let task = graph.get_mut(&id).unwrap();
        task.core_mut().run.transition(State::Submitted, "x", &clock).unwrap();
        task.core_mut().run.transition(State::Terminated, "failed", &clock).unwrap();
        task.core_mut().run.returncode = grid_core::ReturnCode { signal: None, exitcode: Some(1) };
        assert_eq!(exit_code_for(&graph) & 0b0010, 0b0010);
    }

    #[tokio::test]
    async fn sequential_collection_advances_to_the_next_child_via_default_policy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend);
        let app1 = Application::builder(vec!["/bin/true"]).build().unwrap();
        let app2 = Application::builder(vec!["/bin/true"]).build().unwrap();
        let c1 = engine.add_task(Task::new_application("c1", app1)).unwrap();
        let c2 = engine.add_task(Task::new_application("c2", app2)).unwrap();
        let coll = SequentialTaskCollection::new("seq", vec![c1.clone(), c2.clone()]);
        engine.add_root(Task::Sequential(coll)).unwrap();

        for _ in 0..8 {
            engine.progress().await.unwrap();
        }

        assert_eq!(engine.graph().state_of(&c1), State::Terminated);
        assert_eq!(engine.graph().state_of(&c2), State::Terminated);
    }

    struct TwoStagePolicy;

    impl StagePolicy for TwoStagePolicy {
        fn stage(&self, n: usize, _previous: Option<&Task>) -> Option<Task> {
            if n < 2 {
                let app = Application::builder(vec!["/bin/true"]).build().unwrap();
                Some(Task::new_application(format!("stage{n}"), app))
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn staged_collection_materializes_stages_one_at_a_time_via_policy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend);
        let coll = StagedTaskCollection::new("pipeline").with_policy(Arc::new(TwoStagePolicy));
        let root = engine.add_root(Task::Staged(coll)).unwrap();

        for _ in 0..10 {
            engine.progress().await.unwrap();
        }

        let Some(Task::Staged(coll)) = engine.graph().get(&root) else {
            panic!("root is not a StagedTaskCollection");
        };
        assert_eq!(coll.stages.len(), 2);
        assert!(coll.done);
        for stage in &coll.stages {
            assert_eq!(engine.graph().state_of(stage), State::Terminated);
        }
    }

    struct ConstantSweepPolicy;

    impl SweepPolicy for ConstantSweepPolicy {
        fn new_task(&self, param: i64) -> Application {
            Application::builder(vec!["/bin/true"]).extra("param", param).build().unwrap()
        }
    }

    #[tokio::test]
    async fn chunked_sweep_grows_its_window_as_children_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local").with_free_slots(10);
        let mut engine = engine(dir.path(), backend);
        let sweep = ChunkedParameterSweep::new("sweep", 0, 3, 1, 2)
            .with_policy(Arc::new(ConstantSweepPolicy));
        let root = engine.add_root(Task::Chunked(sweep)).unwrap();

        for _ in 0..8 {
            engine.progress().await.unwrap();
        }

        let Some(Task::Chunked(sweep)) = engine.graph().get(&root) else {
            panic!("root is not a ChunkedParameterSweep");
        };
        assert!(sweep.exhausted());
        assert_eq!(sweep.children.len(), 3);
        for child in &sweep.children {
            assert_eq!(engine.graph().state_of(child), State::Terminated);
        }
    }

    #[tokio::test]
    async fn retryable_task_resubmits_a_fresh_attempt_on_failure_then_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new("local");
        let mut engine = engine(dir.path(), backend.clone());
        backend.push_poll_result(Ok(PolledState {
            state: State::Terminated,
            returncode: Some(ReturnCode { signal: None, exitcode: Some(1) }),
        }));
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let first = engine.add_task(Task::new_application("attempt0", app)).unwrap();
        let retry = RetryableTask::new("retry", first.clone()).with_policy(Arc::new(MaxRetries(1)));
        let root = engine.add_root(Task::Retryable(retry)).unwrap();

        for _ in 0..12 {
            engine.progress().await.unwrap();
        }

        let Some(Task::Retryable(r)) = engine.graph().get(&root) else {
            panic!("root is not a RetryableTask");
        };
        assert!(r.done);
        assert_eq!(r.children.len(), 2);
        assert_eq!(engine.graph().state_of(&r.children[0]), State::Terminated);
        assert_eq!(engine.graph().state_of(&r.children[1]), State::Terminated);
        assert!(engine.graph().returncode_of(&r.children[1]).is_success());
    }
}
