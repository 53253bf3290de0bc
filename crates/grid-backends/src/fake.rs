// SPDX-License-Identifier: MIT

//! [`FakeBackend`] — a scripted, in-memory Backend for Engine and
//! Scheduler tests, grounded on the teacher's fake-adapter call-log
//! pattern (e.g. `crates/adapters/src/notify.rs`'s `fake` module): every
//! call is recorded, and canned responses are consumed in order.

use async_trait::async_trait;
use grid_core::{
    Application, Architecture, Backend, BackendInfo, CancelError, PeekError, PollError,
    PolledState, ReturnCode, StagingError, State, Stream, SubmitError,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// One recorded call, for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit { job_name: String },
    UpdateState { backend_job_id: String },
    Cancel { backend_job_id: String },
    Peek { backend_job_id: String },
    FetchOutput { backend_job_id: String },
    Free { backend_job_id: String },
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    submit_script: VecDeque<Result<String, SubmitError>>,
    poll_script: VecDeque<Result<PolledState, PollError>>,
    next_job_id: u64,
    free_slots: u32,
}

/// A Backend double whose `submit`/`update_state` responses are scripted
/// in advance. Defaults to always succeeding with one free slot.
pub struct FakeBackend {
    name: String,
    inner: Mutex<Inner>,
}

impl FakeBackend {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(Inner { free_slots: 4, ..Inner::default() }),
        })
    }

    pub fn with_free_slots(self: &Arc<Self>, free_slots: u32) -> Arc<Self> {
        self.inner.lock().free_slots = free_slots;
        self.clone()
    }

    /// Queue the result of the next `submit` call.
    pub fn push_submit_result(&self, result: Result<String, SubmitError>) {
        self.inner.lock().submit_script.push_back(result);
    }

    /// Queue the result of the next `update_state` call.
    pub fn push_poll_result(&self, result: Result<PolledState, PollError>) {
        self.inner.lock().poll_script.push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name.clone(),
            backend_type: "fake".to_string(),
            architecture: Architecture::X86_64,
            max_cores_per_job: 64,
            max_memory_per_core: None,
            max_walltime: None,
            tags: BTreeSet::new(),
            free_slots: self.inner.lock().free_slots,
            queued_jobs: 0,
            own_user_queued: 0,
            own_user_running: 0,
            updated: true,
        }
    }

    async fn submit(&self, app: &Application, _output_dir: &Path) -> Result<String, SubmitError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Submit { job_name: app.arguments.first().cloned().unwrap_or_default() });
        if let Some(scripted) = inner.submit_script.pop_front() {
            return scripted;
        }
        inner.next_job_id += 1;
        Ok(format!("fake.{}", inner.next_job_id))
    }

    async fn update_state(&self, backend_job_id: &str) -> Result<PolledState, PollError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::UpdateState { backend_job_id: backend_job_id.to_string() });
        inner
            .poll_script
            .pop_front()
            .unwrap_or(Ok(PolledState { state: State::Terminated, returncode: Some(ReturnCode::ok(0)) }))
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), CancelError> {
        self.inner.lock().calls.push(Call::Cancel { backend_job_id: backend_job_id.to_string() });
        Ok(())
    }

    async fn peek(
        &self,
        backend_job_id: &str,
        _stream: Stream,
        _offset: u64,
        _size: u64,
    ) -> Result<Vec<u8>, PeekError> {
        self.inner.lock().calls.push(Call::Peek { backend_job_id: backend_job_id.to_string() });
        Ok(Vec::new())
    }

    async fn fetch_output(
        &self,
        backend_job_id: &str,
        _app: &Application,
        _dest_dir: &Path,
        _overwrite: bool,
    ) -> Result<(), StagingError> {
        self.inner.lock().calls.push(Call::FetchOutput { backend_job_id: backend_job_id.to_string() });
        Ok(())
    }

    async fn free(&self, backend_job_id: &str) -> Result<(), CancelError> {
        self.inner.lock().calls.push(Call::Free { backend_job_id: backend_job_id.to_string() });
        Ok(())
    }
}
