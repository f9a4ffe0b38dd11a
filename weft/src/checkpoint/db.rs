//! The database-secondary fallback: a single-table `rusqlite` store used only
//! when the filesystem write fails, and consulted on load only when the
//! filesystem has no record. The file is always authoritative when both exist.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::CheckpointError;

pub struct DbCheckpointFallback {
    conn: Mutex<Connection>,
}

impl DbCheckpointFallback {
    pub fn open(db_path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_tasks (
                task_id TEXT PRIMARY KEY,
                state_snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, CheckpointError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_tasks (
                task_id TEXT PRIMARY KEY,
                state_snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save(&self, task_id: &str, state_json: &str) -> Result<(), CheckpointError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO agent_tasks (task_id, state_snapshot, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(task_id) DO UPDATE SET state_snapshot = excluded.state_snapshot,
                                                 updated_at = excluded.updated_at",
            params![task_id, state_json],
        )?;
        Ok(())
    }

    pub fn load(&self, task_id: &str) -> Result<Option<String>, CheckpointError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare("SELECT state_snapshot FROM agent_tasks WHERE task_id = ?1")?;
        let mut rows = stmt.query(params![task_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
