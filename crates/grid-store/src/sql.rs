// SPDX-License-Identifier: MIT

//! [`SqlStore`] — a `Store` backed by a single `store` table: `id`,
//! `data` (the serialized Task), `state` (kept in its own column so a
//! host program can query "all RUNNING tasks" without deserializing
//! every row), plus any caller-declared extra columns, each populated by
//! an accessor function run over the Task at save time (spec §4.6).
//!
//! Uses `rusqlite` — synchronous, matching the Store trait's blocking
//! interface; the teacher workspace has no existing SQL dependency, so
//! this is a deliberate stack addition (recorded in DESIGN.md) rather
//! than reuse of teacher code.

use crate::error::StoreError;
use crate::id_factory::IdFactory;
use crate::store::{Store, TaskHandle};
use grid_core::{Persistable, PersistentId, Task};
use parking_lot::RwLock;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// An extra column populated from the Task at save time.
pub struct ExtraColumn {
    pub name: &'static str,
    pub accessor: fn(&Task) -> String,
}

pub struct SqlStore {
    conn: Option<Connection>,
    path: PathBuf,
    id_factory: IdFactory,
    extra_columns: Vec<ExtraColumn>,
    cache: HashMap<PersistentId, Weak<RwLock<Task>>>,
}

impl SqlStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        Self::open_with_columns(path, Vec::new())
    }

    pub fn open_with_columns(
        path: impl AsRef<std::path::Path>,
        extra_columns: Vec<ExtraColumn>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        Self::create_table(&conn, &extra_columns)?;

        let id_path = path.with_extension("next-id");
        let id_factory = IdFactory::with_reservation_file(id_path)?;
        Ok(Self { conn: Some(conn), path, id_factory, extra_columns, cache: HashMap::new() })
    }

    fn create_table(conn: &Connection, extra_columns: &[ExtraColumn]) -> Result<(), StoreError> {
        let mut create = "CREATE TABLE IF NOT EXISTS store (\
            id VARCHAR PRIMARY KEY, data BLOB NOT NULL, state VARCHAR NOT NULL"
            .to_string();
        for col in extra_columns {
            create.push_str(&format!(", {} TEXT", col.name));
        }
        create.push(')');
        conn.execute(&create, [])?;
        Ok(())
    }

    /// Borrow the live connection, or fail if `pre_fork` closed it and
    /// `post_fork` hasn't reopened it yet.
    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::ConnectionClosed)
    }
}

impl Store for SqlStore {
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

        let (data, state, extras): (String, String, Vec<String>) = {
            let task = handle.read();
            let data = serde_json::to_string(&*task)?;
            let state = format!("{:?}", task.state());
            let extras = self.extra_columns.iter().map(|c| (c.accessor)(&task)).collect();
            (data, state, extras)
        };

        let mut columns = vec!["id".to_string(), "data".to_string(), "state".to_string()];
        let mut placeholders = vec!["?1".to_string(), "?2".to_string(), "?3".to_string()];
        for (i, col) in self.extra_columns.iter().enumerate() {
            columns.push(col.name.to_string());
            placeholders.push(format!("?{}", i + 4));
        }
        let sql = format!(
            "INSERT INTO store ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            columns
                .iter()
                .skip(1)
                .map(|c| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(id.to_string()), Box::new(data), Box::new(state)];
        for extra in extras {
            params.push(Box::new(extra));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        self.conn()?.execute(&sql, param_refs.as_slice())?;

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
        let data: String = self
            .conn()?
            .query_row("SELECT data FROM store WHERE id = ?1", [id.to_string()], |row| row.get(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sql(other),
            })?;
        let task: Task = serde_json::from_str(&data)?;
        let handle = Arc::new(RwLock::new(task));
        self.cache.insert(id.clone(), Arc::downgrade(&handle));
        Ok(handle)
    }

    fn remove(&mut self, id: &PersistentId) -> Result<(), StoreError> {
        self.conn()?.execute("DELETE FROM store WHERE id = ?1", [id.to_string()])?;
        self.cache.remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<PersistentId>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM store ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row?;
            match raw.parse::<PersistentId>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(id = %raw, "skipping unparseable store row"),
            }
        }
        Ok(ids)
    }

    fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    /// Closes the sqlite connection. `rusqlite::Connection` wraps a raw
    /// file handle that isn't safe to share across a `fork()`; a host
    /// process must call this immediately before forking.
    fn pre_fork(&mut self) -> Result<(), StoreError> {
        self.conn = None;
        Ok(())
    }

    /// Reopens the sqlite connection at the same path it was created
    /// with. A no-op if the connection was never closed.
    fn post_fork(&mut self) -> Result<(), StoreError> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.path)?;
            Self::create_table(&conn, &self.extra_columns)?;
            self.conn = Some(conn);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_core::Application;

    fn new_app_handle(jobname: &str) -> TaskHandle {
        let app = Application::builder(vec!["/bin/true"]).build().unwrap();
        Arc::new(RwLock::new(Task::new_application(jobname, app)))
    }

    #[test]
    fn save_and_load_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqlStore::open(dir.path().join("store.db")).unwrap();
        let handle = new_app_handle("t1");
        let id = store.save(&handle).unwrap();

        store.invalidate_cache();
        let loaded = store.get_or_load(&id).unwrap();
        assert_eq!(loaded.read().core().jobname, "t1");
    }

    #[test]
    fn extra_column_is_populated_from_accessor() {
        let dir = tempfile::tempdir().unwrap();
        fn jobname_column(task: &Task) -> String {
            task.core().jobname.clone()
        }
        let mut store = SqlStore::open_with_columns(
            dir.path().join("store.db"),
            vec![ExtraColumn { name: "jobname", accessor: jobname_column }],
        )
        .unwrap();
        let id = store.save(&new_app_handle("widget-run")).unwrap();

        let stored: String = store
            .conn()
            .unwrap()
            .query_row("SELECT jobname FROM store WHERE id = ?1", [id.to_string()], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "widget-run");
    }

    #[test]
    fn list_is_empty_for_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlStore::open(dir.path().join("store.db")).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn replace_writes_under_the_given_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqlStore::open(dir.path().join("store.db")).unwrap();
        let id = store.save(&new_app_handle("t1")).unwrap();

        store.replace(&id, &new_app_handle("t2")).unwrap();

        store.invalidate_cache();
        let loaded = store.get_or_load(&id).unwrap();
        assert_eq!(loaded.read().core().jobname, "t2");
    }

    #[test]
    fn post_fork_reopens_the_connection_closed_by_pre_fork() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqlStore::open(dir.path().join("store.db")).unwrap();
        let id = store.save(&new_app_handle("t1")).unwrap();

        store.pre_fork().unwrap();
        assert!(matches!(store.get_or_load(&id), Err(StoreError::ConnectionClosed)));

        store.post_fork().unwrap();
        store.invalidate_cache();
        let loaded = store.get_or_load(&id).unwrap();
        assert_eq!(loaded.read().core().jobname, "t1");
    }
}
