// SPDX-License-Identifier: MIT

//! End-to-end scenarios driving `grid-engine`'s `Engine` across full Task
//! lifecycles the way a host program would: build a Task tree, sweep it to
//! completion, assert on the final `TaskGraph` and `Store`.

use grid_backends::FakeBackend;
use grid_core::{
    Application, ChunkedParameterSweep, FakeClock, MaxRetries, ParallelTaskCollection,
    PolledState, ReturnCode, RetryableTask, SequentialTaskCollection, StagePolicy,
    StagedTaskCollection, State, SweepPolicy, Task,
};
use grid_engine::{Engine, EngineConfig};
use grid_session::{Session, StoreUrl};
use grid_store::fs::FilesystemStore;
use std::sync::Arc;

fn app() -> Application {
    Application::builder(vec!["/bin/true"]).build().unwrap()
}

fn engine_with(
    dir: &std::path::Path,
    backend: Arc<dyn grid_core::Backend>,
) -> Engine<FilesystemStore, FakeClock> {
    let store = FilesystemStore::open(dir.join("jobs")).unwrap();
    Engine::with_clock(store, vec![backend], dir.to_path_buf(), EngineConfig::default(), FakeClock::new())
}

async fn sweep_until(
    engine: &mut Engine<FilesystemStore, FakeClock>,
    mut done: impl FnMut(&Engine<FilesystemStore, FakeClock>) -> bool,
    max_sweeps: u32,
) {
    for _ in 0..max_sweeps {
        if done(engine) {
            return;
        }
        engine.progress().await.unwrap();
    }
    assert!(done(engine), "did not converge within {max_sweeps} sweeps");
}

/// Scenario 1: a single Application runs NEW -> SUBMITTED -> TERMINATING ->
/// TERMINATED and its output is fetched exactly once.
#[tokio::test]
async fn happy_path_single_job_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local");
    let mut engine = engine_with(dir.path(), backend.clone());
    let id = engine.add_root(Task::new_application("job", app())).unwrap();

    sweep_until(&mut engine, |e| e.graph().state_of(&id) == State::Terminated, 10).await;

    assert!(engine.graph().returncode_of(&id).is_success());
    let fetch_calls =
        backend.calls().into_iter().filter(|c| matches!(c, grid_backends::Call::FetchOutput { .. })).count();
    assert_eq!(fetch_calls, 1, "fetch_output should run exactly once per completed job");
}

/// Scenario 2: a ParallelTaskCollection's own derived state only reaches
/// TERMINATED once every child has, and reports the worst return code.
#[tokio::test]
async fn parallel_fan_out_waits_for_every_child_and_reports_worst_returncode() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local").with_free_slots(10);
    // second child's poll reports a non-zero exit.
    backend.push_poll_result(Ok(PolledState { state: State::Terminated, returncode: Some(ReturnCode::ok(0)) }));
    backend.push_poll_result(Ok(PolledState {
        state: State::Terminated,
        returncode: Some(ReturnCode { signal: None, exitcode: Some(1) }),
    }));
    let mut engine = engine_with(dir.path(), backend);

    let a = engine.add_task(Task::new_application("a", app())).unwrap();
    let b = engine.add_task(Task::new_application("b", app())).unwrap();
    let coll = ParallelTaskCollection::new("fanout", vec![a.clone(), b.clone()]);
    let root = engine.add_root(Task::Parallel(coll)).unwrap();

    sweep_until(&mut engine, |e| e.graph().state_of(&root) == State::Terminated, 10).await;

    assert_eq!(engine.graph().state_of(&a), State::Terminated);
    assert_eq!(engine.graph().state_of(&b), State::Terminated);
    assert!(!engine.graph().returncode_of(&root).is_success());
}

struct FixedStages(Vec<&'static str>);

impl StagePolicy for FixedStages {
    fn stage(&self, n: usize, _previous: Option<&Task>) -> Option<Task> {
        self.0.get(n).map(|name| Task::new_application(*name, app()))
    }
}

/// Scenario 3: a StagedTaskCollection materializes each stage only after
/// the previous one has terminated successfully, and finishes once the
/// policy stops producing new stages.
#[tokio::test]
async fn sequential_stages_run_one_at_a_time_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local");
    let mut engine = engine_with(dir.path(), backend);

    let coll = StagedTaskCollection::new("pipeline")
        .with_policy(Arc::new(FixedStages(vec!["fetch", "convert", "publish"])));
    let root = engine.add_root(Task::Staged(coll)).unwrap();

    sweep_until(
        &mut engine,
        |e| match e.graph().get(&root) {
            Some(Task::Staged(c)) => c.done,
            _ => false,
        },
        30,
    )
    .await;

    let Some(Task::Staged(coll)) = engine.graph().get(&root) else { unreachable!() };
    assert_eq!(coll.stages.len(), 3);
    for stage in &coll.stages {
        assert_eq!(engine.graph().state_of(stage), State::Terminated);
    }
    assert_eq!(engine.graph().state_of(&root), State::Terminated);
}

/// Scenario 4: a RetryableTask resubmits a fresh attempt on failure up to
/// its policy's limit, then gives up once the limit is reached.
#[tokio::test]
async fn retry_on_failure_gives_up_after_the_configured_limit() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local");
    for _ in 0..3 {
        backend.push_poll_result(Ok(PolledState {
            state: State::Terminated,
            returncode: Some(ReturnCode { signal: None, exitcode: Some(1) }),
        }));
    }
    let mut engine = engine_with(dir.path(), backend.clone());

    let first = engine.add_task(Task::new_application("attempt", app())).unwrap();
    let retry = RetryableTask::new("flaky", first).with_policy(Arc::new(MaxRetries(2)));
    let root = engine.add_root(Task::Retryable(retry)).unwrap();

    sweep_until(
        &mut engine,
        |e| match e.graph().get(&root) {
            Some(Task::Retryable(r)) => r.done,
            _ => false,
        },
        30,
    )
    .await;

    let Some(Task::Retryable(r)) = engine.graph().get(&root) else { unreachable!() };
    assert_eq!(r.children.len(), 3, "one initial attempt plus two retries");
    for child in &r.children {
        assert_eq!(engine.graph().state_of(child), State::Terminated);
        assert!(!engine.graph().returncode_of(child).is_success());
    }
}

/// Scenario 5: a process restart reloads a Session's indexed Tasks from
/// the Store and a fresh Engine continues sweeping them to completion.
#[tokio::test]
async fn crash_restart_resumes_an_unfinished_session_from_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let session_dir = tmp.path().join("session");

    // First "process": submit a job, then crash after the first sweep
    // (before it has terminated).
    let id = {
        let store = FilesystemStore::open(session_dir.join("jobs")).unwrap();
        let mut session = Session::create(&session_dir, store, StoreUrl::default_file()).unwrap();
        let backend = FakeBackend::new("local");
        let store = FilesystemStore::open(session_dir.join("jobs")).unwrap();
        let mut engine = Engine::with_clock(
            store,
            vec![backend],
            session_dir.clone(),
            EngineConfig::default(),
            FakeClock::new(),
        );
        let id = engine.add_root(Task::new_application("resumed", app())).unwrap();
        engine.progress().await.unwrap();
        assert_eq!(engine.graph().state_of(&id), State::Submitted);

        let handle: grid_store::TaskHandle =
            Arc::new(parking_lot::RwLock::new(engine.graph().get(&id).unwrap().clone()));
        session.add(&handle).unwrap();
        id
    };

    // Second "process": reopen the session and a fresh Engine, load the
    // unfinished Task, and sweep it the rest of the way.
    let store = FilesystemStore::open(session_dir.join("jobs")).unwrap();
    let mut session = Session::open(&session_dir, store).unwrap();
    assert_eq!(session.list_ids(), &[id.clone()]);

    let backend = FakeBackend::new("local");
    let store = FilesystemStore::open(session_dir.join("jobs")).unwrap();
    let mut engine =
        Engine::with_clock(store, vec![backend], session_dir, EngineConfig::default(), FakeClock::new());
    engine.load(id.clone()).unwrap();
    assert_eq!(engine.graph().state_of(&id), State::Submitted);

    sweep_until(&mut engine, |e| e.graph().state_of(&id) == State::Terminated, 10).await;
    assert!(engine.graph().returncode_of(&id).is_success());
}

/// Scenario 6: when no backend's advertised capacity/resource limits can
/// satisfy an Application's request, the Task stays NEW with the rejection
/// reasons recorded rather than being silently dropped or failed.
#[tokio::test]
async fn scheduler_rejection_leaves_the_task_new_with_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local").with_free_slots(0);
    let mut engine = engine_with(dir.path(), backend);
    let id = engine.add_root(Task::new_application("too-big", app())).unwrap();

    engine.progress().await.unwrap();
    engine.progress().await.unwrap();

    assert_eq!(engine.graph().state_of(&id), State::New);
}

struct SweepOf(Arc<std::sync::atomic::AtomicI64>);

impl SweepPolicy for SweepOf {
    fn new_task(&self, param: i64) -> Application {
        self.0.fetch_max(param, std::sync::atomic::Ordering::SeqCst);
        Application::builder(vec!["/bin/true"]).extra("n", param).build().unwrap()
    }
}

/// A ChunkedParameterSweep materializes its full [min, max) range in
/// bounded-size windows and eventually exhausts it.
#[tokio::test]
async fn chunked_parameter_sweep_materializes_the_full_range_in_windows() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("local").with_free_slots(10);
    let mut engine = engine_with(dir.path(), backend);
    let seen = Arc::new(std::sync::atomic::AtomicI64::new(-1));
    let sweep = ChunkedParameterSweep::new("sweep", 0, 5, 1, 2).with_policy(Arc::new(SweepOf(seen.clone())));
    let root = engine.add_root(Task::Chunked(sweep)).unwrap();

    sweep_until(
        &mut engine,
        |e| match e.graph().get(&root) {
            Some(Task::Chunked(s)) => s.exhausted() && s.children.iter().all(|c| e.graph().state_of(c) == State::Terminated),
            _ => false,
        },
        30,
    )
    .await;

    let Some(Task::Chunked(sweep)) = engine.graph().get(&root) else { unreachable!() };
    assert_eq!(sweep.children.len(), 5);
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 4);
}
