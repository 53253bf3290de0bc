// SPDX-License-Identifier: MIT

//! [`StoreUrl`] — the single-line contents of a session's `store.url` file
//! (spec §4.7/§6): `scheme://location`, naming the Store so a Session can
//! be reopened without the host having to remember which backing medium
//! it used.

use crate::error::SessionError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    File(PathBuf),
    Sqlite(PathBuf),
}

impl StoreUrl {
    /// The default layout: a `jobs/` subdirectory of the session.
    pub fn default_file() -> Self {
        StoreUrl::File(PathBuf::from("jobs"))
    }

    fn location(&self) -> &Path {
        match self {
            StoreUrl::File(p) | StoreUrl::Sqlite(p) => p,
        }
    }

    /// Whether the store's backing location is nested inside `session_dir`
    /// (spec §4.7: "if a Session is opened on an existing directory whose
    /// Store is also contained inside that directory, `destroy()` removes
    /// the Store too").
    pub fn is_contained_in(&self, session_dir: &Path) -> bool {
        let location = self.location();
        if location.is_absolute() {
            location.starts_with(session_dir)
        } else {
            true
        }
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreUrl::File(p) => write!(f, "file://{}", p.display()),
            StoreUrl::Sqlite(p) => write!(f, "sqlite://{}", p.display()),
        }
    }
}

impl FromStr for StoreUrl {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("file://") {
            Ok(StoreUrl::File(PathBuf::from(rest)))
        } else if let Some(rest) = s.strip_prefix("sqlite://") {
            Ok(StoreUrl::Sqlite(PathBuf::from(rest)))
        } else {
            Err(SessionError::InvalidStoreUrl(s.to_string()))
        }
    }
}
