// SPDX-License-Identifier: MIT

//! [`Backend`] — the adapter interface between the Engine and a concrete
//! execution resource (spec §4.2). Mirrors the shape of the teacher's
//! `AgentAdapter` trait: an `async_trait`, a typed error per operation,
//! and a capability-description struct the Scheduler consults before
//! ever calling `submit`.

use crate::application::Application;
use crate::error::{CancelError, PeekError, PollError, StagingError, SubmitError};
use crate::resource::{Architecture, MemoryQuantity};
use crate::run::{ReturnCode, State};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Which standard stream a `peek` reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Capability and load snapshot a Backend reports to the Scheduler (spec
/// §4.2): static limits plus the dynamic counters ranking reads from.
/// Refreshed once per sweep by [`Backend::update`]; `updated` records
/// whether that refresh actually happened, since a Backend whose
/// snapshot is stale is filtered out entirely (spec §4.3 rule 6).
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: String,
    pub backend_type: String,
    pub architecture: Architecture,
    pub max_cores_per_job: u32,
    pub max_memory_per_core: Option<MemoryQuantity>,
    pub max_walltime: Option<Duration>,
    pub tags: BTreeSet<String>,
    pub free_slots: u32,
    pub queued_jobs: u32,
    pub own_user_queued: u32,
    pub own_user_running: u32,
    pub updated: bool,
}

impl BackendInfo {
    pub fn has_capacity(&self) -> bool {
        self.updated && self.free_slots > 0
    }
}

/// The result of a successful poll (spec §4.2 `update_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolledState {
    pub state: State,
    pub returncode: Option<ReturnCode>,
}

/// Adapter to a concrete execution resource (a local process pool, a
/// batch scheduler, a container runtime, ...). One Engine may hold
/// several ranked Backends; the Scheduler decides which to try first
/// (spec §4.3).
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn info(&self) -> BackendInfo;

    /// Submit `app` for execution, staging its declared inputs first.
    /// Returns the backend-native job id used by later calls.
    async fn submit(&self, app: &Application, output_dir: &Path) -> Result<String, SubmitError>;

    /// Poll the backend for the current state of a previously submitted
    /// job. A `Transient` error should drive the Task to UNKNOWN rather
    /// than fail it outright (spec §4.2, §7).
    async fn update_state(&self, backend_job_id: &str) -> Result<PolledState, PollError>;

    /// Request cancellation of a running job.
    async fn cancel(&self, backend_job_id: &str) -> Result<(), CancelError>;

    /// Read up to `size` bytes of `stream`, starting at `offset`, without
    /// blocking on job completion.
    async fn peek(
        &self,
        backend_job_id: &str,
        stream: Stream,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, PeekError>;

    /// Stage declared outputs back from the backend into `dest_dir`.
    /// `overwrite` controls whether existing files at the destination are
    /// replaced or the call fails.
    async fn fetch_output(
        &self,
        backend_job_id: &str,
        app: &Application,
        dest_dir: &Path,
        overwrite: bool,
    ) -> Result<(), StagingError>;

    /// Release any backend-side resources held for a TERMINATED job.
    /// Best-effort: spec §4.2 says failures here are logged, not
    /// propagated as a Task-affecting error.
    async fn free(&self, backend_job_id: &str) -> Result<(), CancelError>;

    /// Refresh this backend's own view of its capacity (spec §4.2,
    /// called once per sweep before any `submit` decisions are made).
    async fn update(&self) -> BackendInfo {
        self.info()
    }
}
