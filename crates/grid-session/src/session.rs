// SPDX-License-Identifier: MIT

//! [`Session`] — a persistent directory plus a bound [`Store`], indexing
//! the top-level Tasks that belong to it (spec §4.7).

use crate::error::SessionError;
use crate::store_url::StoreUrl;
use grid_core::PersistentId;
use grid_store::{Store, TaskHandle};
use std::fs;
use std::path::{Path, PathBuf};

const STORE_URL_FILE: &str = "store.url";
const SESSION_IDS_FILE: &str = "session_ids.txt";
const CREATED_FILE: &str = "created";
const FINISHED_FILE: &str = "finished";

pub struct Session<S: Store> {
    dir: PathBuf,
    store: S,
    store_url: StoreUrl,
    store_owned: bool,
    ids: Vec<PersistentId>,
}

impl<S: Store> Session<S> {
    /// Create a fresh session directory bound to `store`, recording
    /// `store_url` so the session can be reopened later.
    pub fn create(
        dir: impl Into<PathBuf>,
        store: S,
        store_url: StoreUrl,
    ) -> Result<Self, SessionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store_owned = store_url.is_contained_in(&dir);
        let session = Self { dir, store, store_url, store_owned, ids: Vec::new() };
        fs::File::create(session.dir.join(CREATED_FILE))?;
        session.flush()?;
        Ok(session)
    }

    /// Reopen an existing session directory, reading back its index and
    /// store url. The caller still supplies the live `store` handle since
    /// `Store` implementations aren't constructed generically from a url.
    pub fn open(dir: impl Into<PathBuf>, store: S) -> Result<Self, SessionError> {
        let dir = dir.into();
        let store_url_text = fs::read_to_string(dir.join(STORE_URL_FILE))?;
        let store_url: StoreUrl = store_url_text.trim().parse()?;
        let store_owned = store_url.is_contained_in(&dir);

        let mut ids = Vec::new();
        let ids_path = dir.join(SESSION_IDS_FILE);
        if ids_path.exists() {
            let text = fs::read_to_string(&ids_path)?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                ids.push(line.parse::<PersistentId>()?);
            }
        }

        Ok(Self { dir, store, store_url, store_owned, ids })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_owned(&self) -> bool {
        self.store_owned
    }

    pub fn list_ids(&self) -> &[PersistentId] {
        &self.ids
    }

    /// Load every top-level Task this session indexes.
    pub fn tasks(&mut self) -> Result<Vec<TaskHandle>, SessionError> {
        let ids = self.ids.clone();
        ids.iter().map(|id| self.store.get_or_load(id).map_err(SessionError::from)).collect()
    }

    /// Save `task` and append its id to the index, flushing both steps.
    pub fn add(&mut self, task: &TaskHandle) -> Result<PersistentId, SessionError> {
        let id = self.store.save(task)?;
        if !self.ids.contains(&id) {
            self.ids.push(id.clone());
        }
        self.flush()?;
        Ok(id)
    }

    /// Recursively remove `id` and every descendant from the Store, then
    /// drop it from the index.
    pub fn remove(&mut self, id: &PersistentId) -> Result<(), SessionError> {
        remove_recursive(&mut self.store, id)?;
        self.ids.retain(|existing| existing != id);
        self.flush()?;
        Ok(())
    }

    /// Mark the session finished (touches the `finished` timestamp file).
    pub fn finish(&self) -> Result<(), SessionError> {
        fs::File::create(self.dir.join(FINISHED_FILE))?;
        Ok(())
    }

    /// Rewrite `session_ids.txt` and `store.url`; idempotent.
    pub fn flush(&self) -> Result<(), SessionError> {
        write_atomic(&self.dir.join(STORE_URL_FILE), self.store_url.to_string().as_bytes())?;

        let mut contents = String::new();
        for id in &self.ids {
            contents.push_str(id.as_str());
            contents.push('\n');
        }
        write_atomic(&self.dir.join(SESSION_IDS_FILE), contents.as_bytes())?;
        Ok(())
    }

    /// Delete the session directory. If the Store is itself contained
    /// inside it (`store_owned`), every indexed Task is also removed from
    /// the Store first; an external/shared Store is left alone (spec
    /// §4.7).
    pub fn destroy(self) -> Result<(), SessionError> {
        let Session { dir, mut store, ids, store_owned, .. } = self;
        if store_owned {
            for id in &ids {
                remove_recursive(&mut store, id)?;
            }
        }
        drop(store);
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

fn remove_recursive<S: Store>(store: &mut S, id: &PersistentId) -> Result<(), SessionError> {
    let children = match store.get_or_load(id) {
        Ok(handle) => handle.read().children().to_vec(),
        Err(grid_store::StoreError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for child in &children {
        remove_recursive(store, child)?;
    }
    store.remove(id)?;
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
