// SPDX-License-Identifier: MIT

//! [`Core`] — the thin, stateless façade performing one-shot operations
//! on a single Task against whichever Backend currently owns it (spec
//! §4.4). Unlike [`crate::engine::Engine`], Core never loops and never
//! touches a Store; it is the building block `Engine::progress` is built
//! from, and is also usable directly by a host program that wants to
//! drive one Task without a full sweep.

use crate::error::CoreError;
use grid_core::{Application, Backend, BackendInfo, Clock, ReturnCode, State, Stream, Task};
use grid_scheduler::{select_backends, Candidate};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub struct Core {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl Core {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        let backends = backends.into_iter().map(|b| (b.info().name.clone(), b)).collect();
        Self { backends }
    }

    async fn snapshot(&self) -> Vec<BackendInfo> {
        let mut infos = Vec::with_capacity(self.backends.len());
        for backend in self.backends.values() {
            infos.push(backend.update().await);
        }
        infos
    }

    /// The ranked list of backends a `submit` would try, in order
    /// (spec §4.3): filtered by resource request, ranked by free slots.
    pub async fn select_resources(&self, app: &Application) -> Vec<Candidate> {
        select_backends(app, &self.snapshot().await)
    }

    /// Try every ranked candidate backend in turn. Returns `Ok(true)` once
    /// a backend accepts the job (Task moves NEW -> SUBMITTED). A
    /// unanimous set of recoverable rejections leaves the Task in `NEW`
    /// with the reasons recorded in `Run.info`, returning `Ok(false)` so
    /// the Engine retries next sweep (spec §4.3 Open Question resolution).
    /// A single unrecoverable rejection fast-fails the Task to TERMINATED.
    pub async fn submit(
        &self,
        task: &mut Task,
        output_dir: &Path,
        clock: &impl Clock,
    ) -> Result<bool, CoreError> {
        let Task::Application(app, core) = task else { return Err(CoreError::NotAnApplication) };
        if core.run.state != State::New {
            return Ok(false);
        }

        let candidates = self.select_resources(app).await;
        if candidates.is_empty() {
            core.run.info = "no backend accepts this resource request".to_string();
            core.mark_changed();
            return Ok(false);
        }

        let mut recoverable = Vec::new();
        for candidate in &candidates {
            let Some(backend) = self.backends.get(&candidate.name) else { continue };
            match backend.submit(app, output_dir).await {
                Ok(backend_job_id) => {
                    core.run.backend_job_id = Some(backend_job_id);
                    core.run.backend_name = Some(candidate.name.clone());
                    core.run.transition(
                        State::Submitted,
                        format!("submitted to {}", candidate.name),
                        clock,
                    )?;
                    core.mark_changed();
                    return Ok(true);
                }
                Err(e) if e.is_recoverable() => {
                    recoverable.push(format!("{}: {e}", candidate.name));
                }
                Err(e) => {
                    core.run.force_state(
                        State::Terminated,
                        format!("unrecoverable submission error: {e}"),
                        clock,
                    );
                    core.run.returncode = ReturnCode { signal: None, exitcode: Some(127) };
                    core.mark_changed();
                    return Err(CoreError::Submit(e));
                }
            }
        }
        core.run.info = recoverable.join("; ");
        core.mark_changed();
        Ok(false)
    }

    /// Poll the owning backend and fold the result into `task`'s Run
    /// (spec §4.2, §7: a transient error drives the Task to UNKNOWN
    /// rather than propagating).
    pub async fn update_job_state(
        &self,
        task: &mut Task,
        clock: &impl Clock,
    ) -> Result<(), CoreError> {
        let Task::Application(_app, core) = task else { return Err(CoreError::NotAnApplication) };
        let backend_name = core.run.backend_name.clone().ok_or(CoreError::NotSubmitted)?;
        let backend_job_id = core.run.backend_job_id.clone().ok_or(CoreError::NotSubmitted)?;
        let backend =
            self.backends.get(&backend_name).ok_or(CoreError::UnknownBackend(backend_name))?;

        match backend.update_state(&backend_job_id).await {
            Ok(polled) => {
                if let Some(rc) = polled.returncode {
                    core.run.returncode = rc;
                }
                // A Backend reporting a job done means "ready to stage outputs",
                // not "already staged" — route through TERMINATING so the next
                // sweep runs fetch_output before the Task reaches TERMINATED
                // (spec: SUBMITTED/RUNNING -> TERMINATING (output fetched) -> TERMINATED).
                let target = if polled.state == State::Terminated
                    && core.run.state != State::Terminating
                {
                    State::Terminating
                } else {
                    polled.state
                };
                if target != core.run.state {
                    core.run.transition(target, "polled from backend", clock)?;
                }
                core.mark_changed();
                Ok(())
            }
            Err(grid_core::PollError::Transient(msg)) => {
                core.run.transition(State::Unknown, format!("transient poll error: {msg}"), clock)?;
                core.mark_changed();
                Ok(())
            }
            Err(e) => Err(CoreError::Poll(e)),
        }
    }

    /// Request cancellation from the owning backend and move the Task to
    /// TERMINATING. A no-op on a Task that isn't currently in flight.
    pub async fn kill(&self, task: &mut Task, clock: &impl Clock) -> Result<(), CoreError> {
        let Task::Application(_app, core) = task else { return Err(CoreError::NotAnApplication) };
        if !core.run.state.in_flight() {
            core.run.cancel_requested = false;
            return Ok(());
        }
        let backend_name = core.run.backend_name.clone().ok_or(CoreError::NotSubmitted)?;
        let backend_job_id = core.run.backend_job_id.clone().ok_or(CoreError::NotSubmitted)?;
        let backend =
            self.backends.get(&backend_name).ok_or(CoreError::UnknownBackend(backend_name))?;

        backend.cancel(&backend_job_id).await?;
        core.run.cancel_requested = false;
        core.run.transition(State::Terminating, "cancelled by kill", clock)?;
        core.mark_changed();
        Ok(())
    }

    /// Read a slice of the job's stdout/stderr without waiting for it to
    /// terminate.
    pub async fn peek(
        &self,
        task: &Task,
        stream: Stream,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, CoreError> {
        let Task::Application(_app, core) = task else { return Err(CoreError::NotAnApplication) };
        let backend_name =
            core.run.backend_name.as_ref().ok_or(CoreError::NotSubmitted)?;
        let backend_job_id =
            core.run.backend_job_id.as_ref().ok_or(CoreError::NotSubmitted)?;
        let backend = self
            .backends
            .get(backend_name)
            .ok_or_else(|| CoreError::UnknownBackend(backend_name.clone()))?;
        Ok(backend.peek(backend_job_id, stream, offset, size).await?)
    }

    /// Stage declared outputs back, completing TERMINATING -> TERMINATED.
    pub async fn fetch_output(
        &self,
        task: &mut Task,
        dest_dir: &Path,
        overwrite: bool,
        clock: &impl Clock,
    ) -> Result<(), CoreError> {
        let Task::Application(app, core) = task else { return Err(CoreError::NotAnApplication) };
        let backend_name = core.run.backend_name.clone().ok_or(CoreError::NotSubmitted)?;
        let backend_job_id = core.run.backend_job_id.clone().ok_or(CoreError::NotSubmitted)?;
        let backend =
            self.backends.get(&backend_name).ok_or(CoreError::UnknownBackend(backend_name))?;

        backend.fetch_output(&backend_job_id, app, dest_dir, overwrite).await?;
        if core.run.state == State::Terminating {
            core.run.transition(State::Terminated, "output fetched", clock)?;
        }
        core.mark_changed();
        Ok(())
    }

    /// Release any backend-side resources held for a TERMINATED job.
    pub async fn free(&self, task: &mut Task) -> Result<(), CoreError> {
        let Task::Application(_app, core) = task else { return Err(CoreError::NotAnApplication) };
        let Some(backend_name) = core.run.backend_name.clone() else { return Ok(()) };
        let Some(backend_job_id) = core.run.backend_job_id.take() else { return Ok(()) };
        let backend =
            self.backends.get(&backend_name).ok_or(CoreError::UnknownBackend(backend_name))?;
        backend.free(&backend_job_id).await?;
        core.mark_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_backends::FakeBackend;
    use grid_core::{Application, FakeClock, PolledState, SubmitError};

    fn app() -> Application {
        Application::builder(vec!["/bin/true"]).build().unwrap()
    }

    #[tokio::test]
    async fn submit_moves_new_to_submitted_on_acceptance() {
        let backend = FakeBackend::new("local");
        let core = Core::new(vec![backend.clone()]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();

        let submitted = core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        assert!(submitted);
        assert_eq!(task.state(), State::Submitted);
        assert_eq!(task.run().backend_name.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn submit_with_no_candidate_backend_leaves_task_new() {
        let backend = FakeBackend::new("local").with_free_slots(0);
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();

        let submitted = core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        assert!(!submitted);
        assert_eq!(task.state(), State::New);
    }

    #[tokio::test]
    async fn submit_with_unanimous_recoverable_rejections_leaves_task_new_with_diagnostics() {
        let backend = FakeBackend::new("local");
        backend.push_submit_result(Err(SubmitError::ResourceNotReady("full".to_string())));
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();

        let submitted = core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        assert!(!submitted);
        assert_eq!(task.state(), State::New);
        assert!(task.run().info.contains("full"));
    }

    #[tokio::test]
    async fn submit_with_unrecoverable_error_fast_fails_to_terminated() {
        let backend = FakeBackend::new("local");
        backend.push_submit_result(Err(SubmitError::Unrecoverable("malformed request".to_string())));
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();

        let err = core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap_err();

        assert!(matches!(err, CoreError::Submit(SubmitError::Unrecoverable(_))));
        assert_eq!(task.state(), State::Terminated);
        assert_eq!(task.run().returncode.exitcode, Some(127));
    }

    #[tokio::test]
    async fn update_job_state_applies_the_poll_result() {
        let backend = FakeBackend::new("local");
        backend.push_poll_result(Ok(PolledState {
            state: State::Running,
            returncode: None,
        }));
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();
        core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        core.update_job_state(&mut task, &clock).await.unwrap();

        assert_eq!(task.state(), State::Running);
    }

    #[tokio::test]
    async fn update_job_state_on_transient_error_moves_to_unknown() {
        let backend = FakeBackend::new("local");
        backend.push_poll_result(Err(grid_core::PollError::Transient("timeout".to_string())));
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();
        core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        core.update_job_state(&mut task, &clock).await.unwrap();

        assert_eq!(task.state(), State::Unknown);
    }

    #[tokio::test]
    async fn kill_on_in_flight_task_requests_cancel_and_moves_to_terminating() {
        let backend = FakeBackend::new("local");
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();
        core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();

        core.kill(&mut task, &clock).await.unwrap();

        assert_eq!(task.state(), State::Terminating);
    }

    #[tokio::test]
    async fn kill_on_task_not_in_flight_is_a_no_op() {
        let backend = FakeBackend::new("local");
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();

        core.kill(&mut task, &clock).await.unwrap();

        assert_eq!(task.state(), State::New);
    }

    #[tokio::test]
    async fn fetch_output_completes_terminating_to_terminated() {
        let backend = FakeBackend::new("local");
        let core = Core::new(vec![backend]);
        let mut task = Task::new_application("t", app());
        let clock = FakeClock::new();
        core.submit(&mut task, Path::new("/tmp"), &clock).await.unwrap();
        core.kill(&mut task, &clock).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        core.fetch_output(&mut task, dir.path(), true, &clock).await.unwrap();

        assert_eq!(task.state(), State::Terminated);
    }
}
