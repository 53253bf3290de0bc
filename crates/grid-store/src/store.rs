// SPDX-License-Identifier: MIT

//! The [`Store`] trait (spec §4.6): a keyed map from [`PersistentId`] to a
//! serialized [`Task`]. Each Task already names its children by id rather
//! than embedding them (spec §9's cyclic-reference resolution), so a
//! single `Task` document is always the unit of storage — there is no
//! separate "graph walk" step to flatten shared sub-objects, the Task
//! model is already flat.
//!
//! `get_or_load` resolves the "lazy Proxy object" redesign flag: rather
//! than returning a proxy that transparently loads on first access, the
//! Store keeps a weak-reference cache and hands back the same live
//! `Arc<RwLock<Task>>` handle to every caller asking for the same id,
//! loading from the backing medium only on a cache miss.

use crate::error::StoreError;
use grid_core::{PersistentId, Task};
use parking_lot::RwLock;
use std::sync::Arc;

pub type TaskHandle = Arc<RwLock<Task>>;

pub trait Store: Send {
    /// Persist `task`, assigning it a fresh id first if it doesn't have
    /// one. Returns the id it was saved under.
    fn save(&mut self, handle: &TaskHandle) -> Result<PersistentId, StoreError>;

    /// Return the live handle for `id` if the weak cache still holds it,
    /// otherwise load it from the backing medium into a fresh handle.
    fn get_or_load(&mut self, id: &PersistentId) -> Result<TaskHandle, StoreError>;

    /// Remove `id` from the backing medium and the cache.
    fn remove(&mut self, id: &PersistentId) -> Result<(), StoreError>;

    /// All ids currently present in the backing medium.
    fn list(&self) -> Result<Vec<PersistentId>, StoreError>;

    /// Drop every weak cache entry, forcing the next `get_or_load` for
    /// any id to re-read from the backing medium.
    fn invalidate_cache(&mut self);

    /// Overwrite whatever is stored under `id` with `handle`, regardless
    /// of what persistent id `handle` currently carries. Unlike `save`,
    /// this never allocates a fresh id. Default implementation stamps
    /// `id` onto `handle` and delegates to `save`.
    fn replace(&mut self, id: &PersistentId, handle: &TaskHandle) -> Result<(), StoreError> {
        handle.write().set_persistent_id(id.clone());
        self.save(handle)?;
        Ok(())
    }

    /// Release any resource that must not be inherited across a
    /// `fork()` (open file descriptors, database connections). Called
    /// by a host process before forking. A no-op by default.
    fn pre_fork(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Reacquire whatever `pre_fork` released. Called in the parent
    /// once forking is done, and in the child before it touches the
    /// store again. A no-op by default.
    fn post_fork(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
