// SPDX-License-Identifier: MIT

//! [`LocalBackend`] — runs Applications as local child processes.
//!
//! Grounded on the teacher's coop adapter spawn path
//! (`daemon/src/adapters/agent/coop/spawn.rs`): build a `tokio::process::Command`
//! from the config, redirect standard streams to files, and poll the child
//! rather than blocking on it.

use async_trait::async_trait;
use grid_core::{
    Application, Architecture, Backend, BackendInfo, CancelError, PeekError, PollError,
    PolledState, ReturnCode, State, StagingError, Stream, SubmitError,
};
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Child;
use tokio::sync::Mutex;

struct LocalJob {
    child: Child,
    output_dir: PathBuf,
    stdout_path: String,
    stderr_path: String,
    exited: Option<ReturnCode>,
}

const DEFAULT_STDOUT: &str = "stdout.txt";
const DEFAULT_STDERR: &str = "stderr.txt";

/// Executes Applications as child processes on the local machine. Has no
/// concept of remote staging: `inputs`/`outputs` source/destination URLs
/// are treated as local filesystem paths (optionally `file://`-prefixed).
pub struct LocalBackend {
    name: String,
    max_in_flight: u32,
    jobs: Mutex<HashMap<String, LocalJob>>,
    next_id: AtomicU64,
}

impl LocalBackend {
    pub fn new(name: impl Into<String>, max_in_flight: u32) -> Self {
        Self {
            name: name.into(),
            max_in_flight,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn current_arch() -> Architecture {
        if cfg!(target_arch = "x86_64") {
            Architecture::X86_64
        } else {
            Architecture::I686
        }
    }
}

fn strip_file_scheme(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

#[async_trait]
impl Backend for LocalBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name.clone(),
            backend_type: "local-shell".to_string(),
            architecture: Self::current_arch(),
            max_cores_per_job: num_cpus(),
            max_memory_per_core: None,
            max_walltime: None,
            tags: BTreeSet::new(),
            free_slots: 0,
            queued_jobs: 0,
            own_user_queued: 0,
            own_user_running: 0,
            updated: true,
        }
    }

    async fn submit(&self, app: &Application, output_dir: &Path) -> Result<String, SubmitError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.len() as u32 >= self.max_in_flight {
            return Err(SubmitError::ResourceNotReady("no free local slots".to_string()));
        }
        std::fs::create_dir_all(output_dir)
            .map_err(|e| SubmitError::Unrecoverable(format!("output dir: {e}")))?;

        for (source, remote_path) in &app.inputs {
            let src = strip_file_scheme(source);
            let dest = output_dir.join(remote_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SubmitError::Unrecoverable(format!("staging input: {e}")))?;
            }
            std::fs::copy(src, &dest)
                .map_err(|e| SubmitError::Unrecoverable(format!("staging input {src}: {e}")))?;
        }

        let (program, args) = app
            .arguments
            .split_first()
            .ok_or_else(|| SubmitError::Unrecoverable("empty argument vector".to_string()))?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).current_dir(output_dir).envs(&app.environment);

        cmd.stdin(match &app.stdin {
            Some(path) => {
                let remote = app.inputs.get(path).map(String::as_str).unwrap_or(path.as_str());
                std::fs::File::open(output_dir.join(remote))
                    .map(std::process::Stdio::from)
                    .map_err(|e| SubmitError::Unrecoverable(format!("stdin: {e}")))?
            }
            None => std::process::Stdio::null(),
        });
        let stdout_path = app.stdout.clone().unwrap_or_else(|| DEFAULT_STDOUT.to_string());
        let stderr_path = if app.join {
            stdout_path.clone()
        } else {
            app.stderr.clone().unwrap_or_else(|| DEFAULT_STDERR.to_string())
        };
        cmd.stdout(redirect_file(output_dir, &stdout_path)?);
        cmd.stderr(redirect_file(output_dir, &stderr_path)?);

        let child = cmd
            .spawn()
            .map_err(|e| SubmitError::Unrecoverable(format!("spawn failed: {e}")))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job_id = format!("local.{id}");
        jobs.insert(
            job_id.clone(),
            LocalJob { child, output_dir: output_dir.to_path_buf(), stdout_path, stderr_path, exited: None },
        );
        Ok(job_id)
    }

    async fn update_state(&self, backend_job_id: &str) -> Result<PolledState, PollError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(backend_job_id)
            .ok_or_else(|| PollError::Transient(format!("unknown job {backend_job_id}")))?;

        if let Some(rc) = job.exited {
            return Ok(PolledState { state: State::Terminated, returncode: Some(rc) });
        }

        match job.child.try_wait() {
            Ok(Some(status)) => {
                let rc = ReturnCode {
                    #[cfg(unix)]
                    signal: std::os::unix::process::ExitStatusExt::signal(&status),
                    #[cfg(not(unix))]
                    signal: None,
                    exitcode: status.code(),
                };
                job.exited = Some(rc);
                Ok(PolledState { state: State::Terminated, returncode: Some(rc) })
            }
            Ok(None) => Ok(PolledState { state: State::Running, returncode: None }),
            Err(e) => Err(PollError::Transient(e.to_string())),
        }
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), CancelError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(backend_job_id)
            .ok_or_else(|| CancelError::Unrecoverable(format!("unknown job {backend_job_id}")))?;
        job.child
            .start_kill()
            .map_err(|e| CancelError::Unrecoverable(format!("kill failed: {e}")))
    }

    async fn peek(
        &self,
        backend_job_id: &str,
        stream: Stream,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, PeekError> {
        use std::io::{Read, Seek, SeekFrom};
        let jobs = self.jobs.lock().await;
        let job = jobs
            .get(backend_job_id)
            .ok_or_else(|| PeekError::NotAvailable(format!("unknown job {backend_job_id}")))?;
        let filename = match stream {
            Stream::Stdout => &job.stdout_path,
            Stream::Stderr => &job.stderr_path,
        };
        let path = job.output_dir.join(filename);
        let mut file = std::fs::File::open(&path)
            .map_err(|_| PeekError::NotAvailable(format!("{} not yet written", path.display())))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn fetch_output(
        &self,
        backend_job_id: &str,
        app: &Application,
        dest_dir: &Path,
        overwrite: bool,
    ) -> Result<(), StagingError> {
        let jobs = self.jobs.lock().await;
        let job = jobs
            .get(backend_job_id)
            .ok_or_else(|| StagingError::Failed(format!("unknown job {backend_job_id}")))?;
        for (remote_path, dest_url) in &app.outputs {
            let src = job.output_dir.join(remote_path);
            let dest = dest_dir.join(strip_file_scheme(dest_url));
            if !overwrite && dest.exists() {
                return Err(StagingError::Failed(format!(
                    "destination {} already exists",
                    dest.display()
                )));
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &dest)?;
        }
        Ok(())
    }

    async fn free(&self, backend_job_id: &str) -> Result<(), CancelError> {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(backend_job_id);
        Ok(())
    }

    async fn update(&self) -> BackendInfo {
        let jobs = self.jobs.lock().await;
        let in_flight = jobs.len() as u32;
        let mut info = self.info();
        info.free_slots = self.max_in_flight.saturating_sub(in_flight);
        info.own_user_running = in_flight;
        info
    }
}

fn redirect_file(output_dir: &Path, relative: &str) -> Result<std::process::Stdio, SubmitError> {
    let full = output_dir.join(relative);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SubmitError::Unrecoverable(format!("{}: {e}", full.display())))?;
    }
    std::fs::File::create(&full)
        .map(std::process::Stdio::from)
        .map_err(|e| SubmitError::Unrecoverable(format!("{}: {e}", full.display())))
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}
