// SPDX-License-Identifier: MIT

//! [`Task`] — the abstract unit of schedulable work (spec §3.1, §3.5) and
//! the fields shared by every concrete kind.
//!
//! Rather than a class hierarchy with direct `parent`/Engine pointers
//! (which would create reference cycles), every Task stores its parent
//! collection, if any, as a [`PersistentId`] and is addressed through a
//! flat [`crate::graph::TaskGraph`] registry — the resolution of the
//! "cyclic references" redesign flag (spec §9).

use crate::application::Application;
use crate::collection::{
    ChunkedParameterSweep, ParallelTaskCollection, RetryableTask, SequentialTaskCollection,
    StagedTaskCollection,
};
use crate::id::PersistentId;
use crate::run::{Run, State};
use serde::{Deserialize, Serialize};

/// Fields shared by every Task, concrete or composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCore {
    pub id: Option<PersistentId>,
    pub jobname: String,
    pub parent: Option<PersistentId>,
    pub run: Run,
    #[serde(skip, default = "default_changed")]
    pub changed: bool,
}

fn default_changed() -> bool {
    true
}

impl TaskCore {
    pub fn new(jobname: impl Into<String>) -> Self {
        Self { id: None, jobname: jobname.into(), parent: None, run: Run::default(), changed: true }
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }
}

/// Any object storable by a Store with a unique id (spec GLOSSARY:
/// Persistable). Implemented by [`Task`] itself; the Store's graph walk
/// uses this to assign/read ids uniformly.
pub trait Persistable {
    fn persistent_id(&self) -> Option<&PersistentId>;
    fn set_persistent_id(&mut self, id: PersistentId);
    fn is_changed(&self) -> bool;
    fn clear_changed(&mut self);
    /// The class-name prefix the IdFactory should use for a fresh id.
    fn id_prefix(&self) -> &'static str;
}

/// The tagged-variant encoding of the Task hierarchy (spec §9: "Mixin-based
/// Persistable becomes an interface satisfied by any type that provides
/// persistent_id accessors; serialization uses a tagged-variant encoding
/// keyed by type name").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Task {
    Application(Application, TaskCore),
    Parallel(ParallelTaskCollection),
    Sequential(SequentialTaskCollection),
    Staged(StagedTaskCollection),
    Chunked(ChunkedParameterSweep),
    Retryable(RetryableTask),
}

impl Task {
    pub fn new_application(jobname: impl Into<String>, app: Application) -> Self {
        Task::Application(app, TaskCore::new(jobname))
    }

    pub fn core(&self) -> &TaskCore {
        match self {
            Task::Application(_, core) => core,
            Task::Parallel(c) => &c.core,
            Task::Sequential(c) => &c.core,
            Task::Staged(c) => &c.core,
            Task::Chunked(c) => &c.core,
            Task::Retryable(c) => &c.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut TaskCore {
        match self {
            Task::Application(_, core) => core,
            Task::Parallel(c) => &mut c.core,
            Task::Sequential(c) => &mut c.core,
            Task::Staged(c) => &mut c.core,
            Task::Chunked(c) => &mut c.core,
            Task::Retryable(c) => &mut c.core,
        }
    }

    pub fn run(&self) -> &Run {
        &self.core().run
    }

    pub fn state(&self) -> State {
        self.core().run.state
    }

    /// Whether this Task is a composite whose state is derived from
    /// children (spec §3.4 invariant: derived, never set directly).
    pub fn is_collection(&self) -> bool {
        !matches!(self, Task::Application(..))
    }

    /// Direct child ids, in order, for composites; empty for Application.
    pub fn children(&self) -> &[PersistentId] {
        match self {
            Task::Application(..) => &[],
            Task::Parallel(c) => &c.children,
            Task::Sequential(c) => &c.children,
            Task::Staged(c) => &c.children,
            Task::Chunked(c) => &c.children,
            Task::Retryable(c) => &c.children,
        }
    }
}

impl Persistable for Task {
    fn persistent_id(&self) -> Option<&PersistentId> {
        self.core().id.as_ref()
    }

    fn set_persistent_id(&mut self, id: PersistentId) {
        self.core_mut().id = Some(id);
    }

    fn is_changed(&self) -> bool {
        self.core().changed
    }

    fn clear_changed(&mut self) {
        self.core_mut().changed = false;
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Task::Application(..) => "Application",
            Task::Parallel(_) => "ParallelTaskCollection",
            Task::Sequential(_) => "SequentialTaskCollection",
            Task::Staged(_) => "StagedTaskCollection",
            Task::Chunked(_) => "ChunkedParameterSweep",
            Task::Retryable(_) => "RetryableTask",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_is_not_a_collection() {
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let task = Task::new_application("t", app);
        assert!(!task.is_collection());
        assert!(task.children().is_empty());
    }

    #[test]
    fn fresh_task_has_no_persistent_id_and_is_changed() {
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        let task = Task::new_application("t", app);
        assert!(task.persistent_id().is_none());
        assert!(task.is_changed());
    }
}
