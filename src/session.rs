//! Session/History Store
//!
//! Persists completed turns per user for continuity across calls. SQLite
//! backend; appends for a user serialize through the connection lock. An
//! empty history is not an error; an agent without persisted turns starts
//! fresh.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::agent::types::AgentTurn;
use crate::error::AgentError;

/// Maximum turns kept per user (rolling window).
const MAX_TURNS_PER_USER: usize = 50;

/// Turn store with SQLite backend.
pub struct SessionStore {
    conn: Mutex<Connection>,
    max_turns: usize,
}

impl SessionStore {
    /// Open or create the session database.
    pub fn open(path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Session(e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| AgentError::Session(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn), max_turns: MAX_TURNS_PER_USER };
        store.init_schema()?;

        info!("Session store opened: {}", path.display());
        Ok(store)
    }

    /// Open with a custom rolling-window size.
    pub fn open_with_config(path: &Path, max_turns: usize) -> Result<Self, AgentError> {
        let mut store = Self::open(path)?;
        store.max_turns = max_turns.max(1);
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AgentError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    turn TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_turns_user
                    ON turns(user_id);
                CREATE INDEX IF NOT EXISTS idx_turns_user_created
                    ON turns(user_id, created_at DESC);
                "#,
            )
            .map_err(|e| AgentError::Session(e.to_string()))?;

        Ok(())
    }

    /// Append a completed turn for a user, trimming the rolling window.
    pub fn append(&self, user_id: &str, turn: &AgentTurn) -> Result<(), AgentError> {
        let serialized =
            serde_json::to_string(turn).map_err(|e| AgentError::Session(e.to_string()))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO turns (user_id, turn, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, serialized, turn.created_at],
        )
        .map_err(|e| AgentError::Session(e.to_string()))?;

        // Trim old turns beyond the window.
        conn.execute(
            "DELETE FROM turns WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM turns WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2
             )",
            params![user_id, self.max_turns],
        )
        .map_err(|e| AgentError::Session(e.to_string()))?;

        debug!("appended turn for user {}", user_id);
        Ok(())
    }

    /// Turn history for a user, most recent last. Missing history yields an
    /// empty vector, never an error.
    pub fn history(&self, user_id: &str, limit: usize) -> Result<Vec<AgentTurn>, AgentError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT turn FROM turns WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )
            .map_err(|e| AgentError::Session(e.to_string()))?;

        let mut turns: Vec<AgentTurn> = stmt
            .query_map(params![user_id, limit], |row| row.get::<_, String>(0))
            .map_err(|e| AgentError::Session(e.to_string()))?
            .filter_map(|r| r.ok())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect();

        // Chronological order, most recent last.
        turns.reverse();
        Ok(turns)
    }

    /// History rendered for prompt injection. Empty string when fresh.
    pub fn history_as_context(&self, user_id: &str, limit: usize) -> Result<String, AgentError> {
        let turns = self.history(user_id, limit)?;
        if turns.is_empty() {
            return Ok(String::new());
        }

        let mut lines = Vec::with_capacity(turns.len() * 2);
        for turn in &turns {
            lines.push(format!("User: {}", turn.request.prompt));
            lines.push(format!("Assistant: {}", turn.answer));
        }
        Ok(lines.join("\n"))
    }

    /// Remove all turns for a user.
    pub fn clear(&self, user_id: &str) -> Result<usize, AgentError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM turns WHERE user_id = ?1", params![user_id])
            .map_err(|e| AgentError::Session(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::Request;
    use tempfile::TempDir;

    fn store(name: &str) -> (SessionStore, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join(format!("{}.db", name));
        let store = SessionStore::open(&path).expect("Failed to create store");
        (store, temp)
    }

    fn turn(prompt: &str, answer: &str, at: i64) -> AgentTurn {
        let mut turn = AgentTurn::new(Request::new(prompt, "u1"));
        turn.answer = answer.to_string();
        turn.created_at = at;
        turn
    }

    #[test]
    fn test_append_and_history_order() {
        let (store, _temp) = store("order");

        store.append("u1", &turn("first?", "first answer", 1000)).unwrap();
        store.append("u1", &turn("second?", "second answer", 2000)).unwrap();

        let history = store.history("u1", 10).unwrap();
        assert_eq!(history.len(), 2);
        // Most recent last.
        assert_eq!(history[0].request.prompt, "first?");
        assert_eq!(history[1].request.prompt, "second?");
    }

    #[test]
    fn test_fresh_user_has_empty_history() {
        let (store, _temp) = store("fresh");
        assert!(store.history("nobody", 10).unwrap().is_empty());
        assert_eq!(store.history_as_context("nobody", 10).unwrap(), "");
    }

    #[test]
    fn test_users_are_isolated() {
        let (store, _temp) = store("isolated");
        store.append("u1", &turn("mine", "a", 1000)).unwrap();
        store.append("u2", &turn("yours", "b", 1000)).unwrap();

        let history = store.history("u1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request.prompt, "mine");
    }

    #[test]
    fn test_rolling_window_trims_old_turns() {
        let temp = TempDir::new().unwrap();
        let store = SessionStore::open_with_config(&temp.path().join("w.db"), 3).unwrap();

        for i in 0..6 {
            store.append("u1", &turn(&format!("q{}", i), "a", 1000 + i)).unwrap();
        }

        let history = store.history("u1", 100).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].request.prompt, "q5");
    }

    #[test]
    fn test_history_as_context_format() {
        let (store, _temp) = store("context");
        store.append("u1", &turn("What is NVDA at?", "875.21", 1000)).unwrap();

        let context = store.history_as_context("u1", 10).unwrap();
        assert!(context.contains("User: What is NVDA at?"));
        assert!(context.contains("Assistant: 875.21"));
    }

    #[test]
    fn test_clear_removes_only_that_user() {
        let (store, _temp) = store("clear");
        store.append("u1", &turn("a", "x", 1)).unwrap();
        store.append("u2", &turn("b", "y", 1)).unwrap();

        assert_eq!(store.clear("u1").unwrap(), 1);
        assert!(store.history("u1", 10).unwrap().is_empty());
        assert_eq!(store.history("u2", 10).unwrap().len(), 1);
    }
}
