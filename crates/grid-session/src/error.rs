// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] grid_store::StoreError),
    #[error("not a valid store url: {0:?}")]
    InvalidStoreUrl(String),
    #[error("malformed persistent id in session_ids.txt: {0}")]
    MalformedId(#[from] grid_core::PersistentIdParseError),
}
