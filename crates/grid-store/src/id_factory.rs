// SPDX-License-Identifier: MIT

//! [`IdFactory`] — assigns fresh, temporally-unique [`PersistentId`]s,
//! grounded on `gc3libs.persistence.idfactory.IdFactory`: one monotonic
//! counter per class-name prefix. Unlike the original, the counter is
//! backed by a reservation file so it survives a process restart without
//! ever reusing a number (spec §4.6).

use crate::error::StoreError;
use grid_core::PersistentId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Generates ids, optionally persisting the per-prefix counters to a
/// reservation file so that a restarted process keeps counting up rather
/// than reusing numbers already handed out.
#[derive(Debug)]
pub struct IdFactory {
    counters: BTreeMap<String, u64>,
    reservation_path: Option<PathBuf>,
}

impl IdFactory {
    /// An in-memory-only factory (tests, or stores with no on-disk home).
    pub fn in_memory() -> Self {
        Self { counters: BTreeMap::new(), reservation_path: None }
    }

    /// A factory backed by a reservation file; existing counters are
    /// loaded if the file already exists.
    pub fn with_reservation_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let counters = if path.exists() {
            load_counters(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { counters, reservation_path: Some(path) })
    }

    /// Allocate the next id for `prefix`, persisting the advanced
    /// counter before returning.
    pub fn reserve(&mut self, prefix: &str) -> Result<PersistentId, StoreError> {
        let seqno = self.counters.entry(prefix.to_string()).or_insert(0);
        let id = PersistentId::new(prefix, *seqno);
        *seqno += 1;
        if let Some(path) = &self.reservation_path {
            save_counters(path, &self.counters)?;
        }
        Ok(id)
    }
}

fn load_counters(path: &Path) -> Result<BTreeMap<String, u64>, StoreError> {
    let contents = fs::read_to_string(path)?;
    let mut counters = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((prefix, seqno)) = line.rsplit_once(' ') else {
            continue;
        };
        if let Ok(seqno) = seqno.parse::<u64>() {
            counters.insert(prefix.to_string(), seqno);
        }
    }
    Ok(counters)
}

fn save_counters(path: &Path, counters: &BTreeMap<String, u64>) -> Result<(), StoreError> {
    let mut contents = String::new();
    for (prefix, seqno) in counters {
        contents.push_str(prefix);
        contents.push(' ');
        contents.push_str(&seqno.to_string());
        contents.push('\n');
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
