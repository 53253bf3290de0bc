// SPDX-License-Identifier: MIT

//! Persistent object identifiers.
//!
//! A [`PersistentId`] has the form `PREFIX.NNN` where `NNN` is a decimal
//! sequence number and `PREFIX` is, by default, the concrete task class
//! name (`Application`, `ParallelTaskCollection`, ...). Ids are assigned by
//! a Store's `IdFactory` (see `grid-store`); this module only defines the
//! value type and its ordering/parsing, since both the Store and the
//! in-memory `TaskGraph` need to pass ids around and compare them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Returns `s` truncated to at most `n` characters.
pub fn short(s: &str, n: usize) -> &str {
    if s.len() <= n {
        s
    } else {
        &s[..n]
    }
}

/// An automatically generated, temporally unique identifier.
///
/// Two ids only compare meaningfully if they share a prefix; ids with
/// different prefixes fall back to lexicographic string comparison (this
/// matches the reference implementation, which compares `(prefix, seqno)`
/// tuples and falls back to string comparison on a prefix mismatch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistentId {
    rendered: String,
    #[serde(skip)]
    prefix_len: usize,
    #[serde(skip)]
    seqno: u64,
}

impl PersistentId {
    /// Construct an id from a class-name prefix and a sequence number.
    pub fn new(prefix: &str, seqno: u64) -> Self {
        Self { rendered: format!("{prefix}.{seqno}"), prefix_len: prefix.len(), seqno }
    }

    pub fn prefix(&self) -> &str {
        &self.rendered[..self.prefix_len]
    }

    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl FromStr for PersistentId {
    type Err = PersistentIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dot = s.rfind('.').ok_or(PersistentIdParseError { input: s.to_string() })?;
        let seqno: u64 =
            s[dot + 1..].parse().map_err(|_| PersistentIdParseError { input: s.to_string() })?;
        Ok(Self { rendered: s.to_string(), prefix_len: dot, seqno })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not a valid persistent id: {input:?}")]
pub struct PersistentIdParseError {
    input: String,
}

impl PartialOrd for PersistentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PersistentId {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.prefix() == other.prefix() {
            self.seqno.cmp(&other.seqno)
        } else {
            self.rendered.cmp(&other.rendered)
        }
    }
}

impl std::borrow::Borrow<str> for PersistentId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}
