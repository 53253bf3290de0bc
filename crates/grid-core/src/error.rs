// SPDX-License-Identifier: MIT

//! Error taxonomy (see spec §7) — each kind carries its own recovery
//! behavior rather than a single catch-all error type, mirroring the
//! shape of the teacher's `AgentAdapterError` / `WalError` enums.

use thiserror::Error;

/// Errors a [`crate::backend::Backend`] may return from `submit`.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The backend has no free capacity right now; try another backend or
    /// retry later. Leaves the Task in `NEW`.
    #[error("backend not ready: {0}")]
    ResourceNotReady(String),
    /// Credentials expired or were rejected; the Core should mark this
    /// backend unusable for the remainder of the ranked list and try the
    /// next one.
    #[error("authentication error: {0}")]
    Auth(String),
    /// No retry will help (e.g. malformed request); drives the Task
    /// directly to TERMINATED.
    #[error("unrecoverable submission error: {0}")]
    Unrecoverable(String),
}

impl SubmitError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SubmitError::Unrecoverable(_))
    }
}

/// Errors a [`crate::backend::Backend`] may return from `update_state`.
#[derive(Debug, Error)]
pub enum PollError {
    /// Network glitch or similar; caller should move the Task to UNKNOWN
    /// and retry with backoff.
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("authentication error: {0}")]
    Auth(String),
}

/// Errors from `cancel`.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("unrecoverable cancellation error: {0}")]
    Unrecoverable(String),
}

/// Errors from `peek`.
#[derive(Debug, Error)]
pub enum PeekError {
    #[error("output not available yet: {0}")]
    NotAvailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from `fetch_output`.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("data staging error: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors validating an [`crate::application::Application`] at construction
/// time — always synchronous, always the caller's fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserError {
    #[error("argument vector must not be empty")]
    EmptyArguments,
    #[error("argument {0} contains a null byte")]
    ArgumentContainsNul(usize),
    #[error("path {path:?} for {field} must be relative, not absolute")]
    AbsolutePath { field: &'static str, path: String },
    #[error("{field} must be a positive integer, got {value}")]
    NonPositiveResource { field: &'static str, value: i64 },
}

/// Errors writing a Task's state directly when it is derived (collections).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("state of a TaskCollection is derived from its children and cannot be set directly")]
    DerivedStateWrite,
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}
