// SPDX-License-Identifier: MIT

use grid_core::{CancelError, PeekError, PollError, StagingError, SubmitError, TaskError};
use thiserror::Error;

/// Errors from a [`crate::core::Core`] one-shot operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task is not an Application")]
    NotAnApplication,
    #[error("no backend named {0:?} is registered")]
    UnknownBackend(String),
    #[error("no backend accepted this Application's resource request")]
    NoCandidateBackend,
    #[error("task has not been submitted to a backend")]
    NotSubmitted,
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Cancel(#[from] CancelError),
    #[error(transparent)]
    Peek(#[from] PeekError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors from an [`crate::engine::Engine`] sweep.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Store(#[from] grid_store::StoreError),
}
