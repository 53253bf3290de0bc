// SPDX-License-Identifier: MIT

//! [`FilesystemStore`] — one JSON file per Task, named after its id.
//! Overwrites are atomic: the old file is renamed to `.OLD` before the
//! new content lands, and removed only once the write has fully
//! succeeded; on any failure the `.OLD` file is restored so a save never
//! leaves an id without a readable copy (spec §4.6, grounded on the
//! teacher's `snapshot::rotate_bak_path` backup-before-overwrite pattern,
//! simplified to a single generation since the Store, unlike a WAL
//! snapshot, is rewritten once per Task per sweep rather than in bulk).

use crate::error::StoreError;
use crate::id_factory::IdFactory;
use crate::store::{Store, TaskHandle};
use grid_core::{Persistable, PersistentId, Task};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

pub struct FilesystemStore {
    dir: PathBuf,
    id_factory: IdFactory,
    cache: HashMap<PersistentId, Weak<RwLock<Task>>>,
}

impl FilesystemStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let id_factory = IdFactory::with_reservation_file(dir.join(".next-id"))?;
        Ok(Self { dir, id_factory, cache: HashMap::new() })
    }

    fn path_for(&self, id: &PersistentId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl Store for FilesystemStore {
    fn save(&mut self, handle: &TaskHandle) -> Result<PersistentId, StoreError> {
        let id = {
            let mut task = handle.write();
            match task.persistent_id().cloned() {
                Some(id) => id,
                None => {
                    let id = self.id_factory.reserve(task.id_prefix())?;
                    task.set_persistent_id(id.clone());
                    id
                }
            }
        };

        let path = self.path_for(&id);
        let json = {
            let task = handle.read();
            serde_json::to_vec_pretty(&*task)?
        };

        let tmp = path.with_extension("json.tmp");
        let backup = path.with_extension("json.OLD");
        fs::write(&tmp, &json)?;
        let had_previous = path.exists();
        if had_previous {
            fs::rename(&path, &backup)?;
        }
        match fs::rename(&tmp, &path) {
            Ok(()) => {
                if had_previous {
                    let _ = fs::remove_file(&backup);
                }
            }
            Err(e) => {
                if had_previous {
                    let _ = fs::rename(&backup, &path);
                }
                return Err(e.into());
            }
        }

        handle.write().clear_changed();
        self.cache.insert(id.clone(), Arc::downgrade(handle));
        Ok(id)
    }

    fn get_or_load(&mut self, id: &PersistentId) -> Result<TaskHandle, StoreError> {
        if let Some(weak) = self.cache.get(id) {
            if let Some(handle) = weak.upgrade() {
                return Ok(handle);
            }
        }
        let path = self.path_for(id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        let task: Task = serde_json::from_slice(&bytes)?;
        let handle = Arc::new(RwLock::new(task));
        self.cache.insert(id.clone(), Arc::downgrade(&handle));
        Ok(handle)
    }

    fn remove(&mut self, id: &PersistentId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<PersistentId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            match stem.parse::<PersistentId>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(file = %name, "skipping unparseable store entry"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn invalidate_cache(&mut self) {
        self.cache.clear();
    }
}
