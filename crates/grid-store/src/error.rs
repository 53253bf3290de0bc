// SPDX-License-Identifier: MIT

//! Store error taxonomy, mirroring the shape of the teacher's
//! `SnapshotError`/`WalError` enums: one variant per failure domain, with
//! `#[from]` wrapping of the lower-level I/O and serialization errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such object: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("sql store error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("object {0} has no persistent id and no prefix could be inferred")]
    MissingId(String),
    #[error("malformed persistent id on disk: {0}")]
    MalformedId(String),
    #[error("store connection is closed (between pre_fork and post_fork)")]
    ConnectionClosed,
}
