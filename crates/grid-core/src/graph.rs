// SPDX-License-Identifier: MIT

//! [`TaskGraph`] — a flat, non-owning registry of Tasks addressed by
//! [`PersistentId`], replacing the mutually-referential
//! parent/child/Engine pointers of the original design (spec §9).
//!
//! Every Task knows its parent's id, if any; every collection knows its
//! children's ids. Nobody holds a direct reference to another Task —
//! lookups always go through a `TaskGraph`, which is exactly the shape a
//! `Store`'s in-memory cache already has to have, so the Engine, the
//! Scheduler, and the Store share this one abstraction.

use crate::id::PersistentId;
use crate::run::{ReturnCode, State};
use crate::task::Task;
use std::collections::BTreeMap;

/// In-memory index of Tasks by id. Not itself a Store — it holds no
/// opinion about persistence, only about graph traversal.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<PersistentId, Task>,
    next_anonymous_seqno: u64,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self { tasks: BTreeMap::new(), next_anonymous_seqno: 0 }
    }

    /// Insert a Task, assigning it a fresh id if it doesn't have one yet.
    /// Real id assignment (crash-safe, process-wide unique) belongs to a
    /// Store's `IdFactory`; this fallback exists so the graph is usable
    /// standalone in tests without a Store.
    pub fn insert(&mut self, mut task: Task) -> PersistentId {
        let id = match task.core().id.clone() {
            Some(id) => id,
            None => {
                let seqno = self.next_anonymous_seqno;
                self.next_anonymous_seqno += 1;
                PersistentId::new(task.id_prefix(), seqno)
            }
        };
        use crate::task::Persistable;
        task.set_persistent_id(id.clone());
        self.tasks.insert(id.clone(), task);
        id
    }

    pub fn get(&self, id: &PersistentId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &PersistentId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn remove(&mut self, id: &PersistentId) -> Option<Task> {
        self.tasks.remove(id)
    }

    pub fn contains(&self, id: &PersistentId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PersistentId> {
        self.tasks.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    /// `UNKNOWN` if the id isn't present — a missing child behaves the
    /// same way an unreachable Backend does: we don't know its state.
    pub fn state_of(&self, id: &PersistentId) -> State {
        self.tasks.get(id).map(Task::state).unwrap_or(State::Unknown)
    }

    pub fn returncode_of(&self, id: &PersistentId) -> ReturnCode {
        self.tasks.get(id).map(|t| t.run().returncode).unwrap_or_default()
    }

    /// Recursively expand `id` into the set of leaf/collection ids that
    /// are schedulable *this sweep* — i.e. the transitive closure of each
    /// ancestor collection's `active_children()` (spec §4.2: "only the
    /// children a collection currently considers active are progressed").
    pub fn active_closure(&self, id: &PersistentId, out: &mut Vec<PersistentId>) {
        let Some(task) = self.tasks.get(id) else { return };
        match task {
            Task::Application(..) => out.push(id.clone()),
            Task::Parallel(c) => {
                for child in c.active_children() {
                    self.active_closure(child, out);
                }
            }
            Task::Sequential(c) => {
                for child in c.active_children() {
                    self.active_closure(child, out);
                }
            }
            Task::Staged(c) => {
                for child in c.active_children() {
                    self.active_closure(child, out);
                }
            }
            Task::Chunked(c) => {
                for child in c.active_children() {
                    self.active_closure(child, out);
                }
            }
            Task::Retryable(c) => {
                for child in c.active_children() {
                    self.active_closure(child, out);
                }
            }
        }
    }

    /// Recompute and apply the derived `(state, returncode)` of a
    /// collection from its current children, bottom-up. Returns `true`
    /// if the state actually changed (so the Engine knows whether to
    /// recurse into this collection's own parent).
    pub fn recompute_derived_state(&mut self, id: &PersistentId) -> bool {
        let Some(task) = self.tasks.get(id) else { return false };
        let (new_state, new_rc) = match task {
            Task::Application(..) => return false,
            Task::Parallel(c) => c.recompute_state(self),
            Task::Sequential(c) => c.recompute_state(self),
            Task::Staged(c) => c.recompute_state(self),
            Task::Chunked(c) => c.recompute_state(self),
            Task::Retryable(c) => c.recompute_state(self),
        };
        let Some(task) = self.tasks.get_mut(id) else { return false };
        let core = task.core_mut();
        if core.run.state == new_state && core.run.returncode == new_rc {
            return false;
        }
        core.run.state = new_state;
        core.run.returncode = new_rc;
        core.mark_changed();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use crate::collection::ParallelTaskCollection;
    use crate::task::Task;

    #[test]
    fn insert_assigns_an_id_when_absent() {
        let mut graph = TaskGraph::new();
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let id = graph.insert(Task::new_application("t", app));
        assert!(graph.contains(&id));
    }

    #[test]
    fn missing_child_reports_unknown_state() {
        let graph = TaskGraph::new();
        let ghost = PersistentId::new("Application", 999);
        assert_eq!(graph.state_of(&ghost), State::Unknown);
    }

    #[test]
    fn active_closure_descends_into_nested_collections() {
        let mut graph = TaskGraph::new();
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let leaf = graph.insert(Task::new_application("leaf", app));
        let parallel = ParallelTaskCollection::new("p", vec![leaf.clone()]);
        let parallel_id = graph.insert(Task::Parallel(parallel));

        let mut out = Vec::new();
        graph.active_closure(&parallel_id, &mut out);
        assert_eq!(out, vec![leaf]);
    }
}
