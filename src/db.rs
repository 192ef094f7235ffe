//! Database module for threadloom
//!
//! Two independent stores share one `SQLite` file: append-only checkpoints
//! of each thread's message history, and the thread title registry.

mod schema;

pub use schema::*;

use crate::title_generator::default_title;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Checkpoint step conflict for {thread_id}: expected {expected}, got {actual}")]
    StepConflict {
        thread_id: String,
        expected: i64,
        actual: i64,
    },
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Checkpoint Operations ====================

    /// Append a checkpoint. `step` must be exactly one past the thread's
    /// latest step (1 for a new thread).
    pub fn save_checkpoint(
        &self,
        thread_id: &str,
        step: i64,
        messages: &[Message],
    ) -> DbResult<Checkpoint> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(step) FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        let expected = latest.unwrap_or(0) + 1;
        if step != expected {
            return Err(DbError::StepConflict {
                thread_id: thread_id.to_string(),
                expected,
                actual: step,
            });
        }

        let now = Utc::now();
        let messages_json = serde_json::to_string(messages)?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, step, messages, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                thread_id,
                step,
                messages_json,
                now.to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )?;
        tx.commit()?;

        Ok(Checkpoint {
            thread_id: thread_id.to_string(),
            step,
            messages: messages.to_vec(),
            created_at: now,
        })
    }

    /// Latest checkpoint of a thread, if any exist
    pub fn latest_checkpoint(&self, thread_id: &str) -> DbResult<Option<Checkpoint>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT step, messages, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1",
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((step, messages_json, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            thread_id: thread_id.to_string(),
            step,
            messages: serde_json::from_str(&messages_json)?,
            created_at: parse_datetime(&created_at),
        }))
    }

    /// All steps recorded for a thread, ascending
    pub fn checkpoint_steps(&self, thread_id: &str) -> DbResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT step FROM checkpoints WHERE thread_id = ?1 ORDER BY step")?;
        let steps = stmt
            .query_map(params![thread_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(steps)
    }

    /// Distinct thread ids with at least one checkpoint, most recently
    /// written first
    pub fn checkpoint_threads(&self) -> DbResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT thread_id FROM checkpoints
             GROUP BY thread_id
             ORDER BY MAX(rowid) DESC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Remove every checkpoint of a thread. Returns the number removed.
    pub fn delete_checkpoints(&self, thread_id: &str) -> DbResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
        )?;
        Ok(removed)
    }

    // ==================== Title Operations ====================

    /// Insert or replace a thread's title
    pub fn upsert_title(&self, thread_id: &str, title: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO thread_metadata (thread_id, title) VALUES (?1, ?2)",
            params![thread_id, title],
        )?;
        Ok(())
    }

    /// Stored titles keyed by thread id
    pub fn titles(&self) -> DbResult<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT thread_id, title FROM thread_metadata")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, title)| {
                let title = title.unwrap_or_else(|| default_title(&id));
                (id, title)
            })
            .collect())
    }

    /// Whether the registry holds a row for the thread
    pub fn has_title(&self, thread_id: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM thread_metadata WHERE thread_id = ?1",
                params![thread_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove a thread's title. Returns the number of rows removed.
    pub fn delete_title(&self, thread_id: &str) -> DbResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM thread_metadata WHERE thread_id = ?1",
            params![thread_id],
        )?;
        Ok(removed)
    }

    /// Summaries for `known_ids` (in order) followed by any titled threads
    /// not among them. Ids without a stored title get a default one.
    pub fn thread_summaries(&self, known_ids: &[String]) -> DbResult<Vec<ThreadSummary>> {
        let mut titles = self.titles()?;
        let mut seen = HashSet::new();
        let mut summaries = Vec::with_capacity(known_ids.len() + titles.len());

        for id in known_ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            let title = titles.remove(id).unwrap_or_else(|| default_title(id));
            summaries.push(ThreadSummary {
                id: id.clone(),
                title,
            });
        }

        let mut rest: Vec<_> = titles.into_iter().collect();
        rest.sort();
        summaries.extend(rest.into_iter().map(|(id, title)| ThreadSummary { id, title }));
        Ok(summaries)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_latest_checkpoint() {
        let db = Database::open_in_memory().unwrap();

        db.save_checkpoint("t1", 1, &[Message::user("hi")]).unwrap();
        db.save_checkpoint(
            "t1",
            2,
            &[Message::user("hi"), Message::assistant("hello", vec![])],
        )
        .unwrap();

        let latest = db.latest_checkpoint("t1").unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(latest.messages.len(), 2);
        assert_eq!(latest.messages[1].text(), "hello");
        assert_eq!(db.checkpoint_steps("t1").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_missing_thread_has_no_checkpoint() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_checkpoint("nope").unwrap().is_none());
    }

    #[test]
    fn test_step_conflict_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.save_checkpoint("t1", 1, &[]).unwrap();

        let err = db.save_checkpoint("t1", 1, &[]).unwrap_err();
        assert!(matches!(
            err,
            DbError::StepConflict {
                expected: 2,
                actual: 1,
                ..
            }
        ));

        let err = db.save_checkpoint("t1", 5, &[]).unwrap_err();
        assert!(matches!(err, DbError::StepConflict { expected: 2, .. }));
        assert_eq!(db.checkpoint_steps("t1").unwrap(), vec![1]);
    }

    #[test]
    fn test_new_thread_must_start_at_step_one() {
        let db = Database::open_in_memory().unwrap();
        let err = db.save_checkpoint("t1", 0, &[]).unwrap_err();
        assert!(matches!(err, DbError::StepConflict { expected: 1, .. }));
    }

    #[test]
    fn test_checkpoint_threads_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        db.save_checkpoint("a", 1, &[]).unwrap();
        db.save_checkpoint("b", 1, &[]).unwrap();
        db.save_checkpoint("a", 2, &[]).unwrap();

        assert_eq!(db.checkpoint_threads().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_delete_checkpoints_counts_rows() {
        let db = Database::open_in_memory().unwrap();
        db.save_checkpoint("a", 1, &[]).unwrap();
        db.save_checkpoint("a", 2, &[]).unwrap();
        db.save_checkpoint("b", 1, &[]).unwrap();

        assert_eq!(db.delete_checkpoints("a").unwrap(), 2);
        assert_eq!(db.delete_checkpoints("a").unwrap(), 0);
        assert!(db.latest_checkpoint("a").unwrap().is_none());
        assert_eq!(db.checkpoint_threads().unwrap(), vec!["b"]);

        // A deleted thread starts over at step 1
        db.save_checkpoint("a", 1, &[]).unwrap();
    }

    #[test]
    fn test_upsert_title_replaces() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_title("t1", "first").unwrap();
        db.upsert_title("t1", "second").unwrap();

        let titles = db.titles().unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles["t1"], "second");
        assert!(db.has_title("t1").unwrap());
        assert!(!db.has_title("t2").unwrap());
    }

    #[test]
    fn test_delete_title_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_title("t1", "x").unwrap();
        assert_eq!(db.delete_title("t1").unwrap(), 1);
        assert_eq!(db.delete_title("t1").unwrap(), 0);
        assert!(db.titles().unwrap().is_empty());
    }

    #[test]
    fn test_thread_summaries_fill_in_defaults() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_title("abcdef123456", "Weather in Paris").unwrap();
        db.upsert_title("orphan", "Only a title").unwrap();

        let known = vec!["abcdef123456".to_string(), "0123456789ab".to_string()];
        let summaries = db.thread_summaries(&known).unwrap();

        assert_eq!(
            summaries,
            vec![
                ThreadSummary {
                    id: "abcdef123456".into(),
                    title: "Weather in Paris".into(),
                },
                ThreadSummary {
                    id: "0123456789ab".into(),
                    title: "Thread 01234567".into(),
                },
                ThreadSummary {
                    id: "orphan".into(),
                    title: "Only a title".into(),
                },
            ]
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threadloom.db");

        {
            let db = Database::open(&path).unwrap();
            db.save_checkpoint("t1", 1, &[Message::user("remember me")])
                .unwrap();
            db.upsert_title("t1", "remember me").unwrap();
        }

        let db = Database::open(&path).unwrap();
        let latest = db.latest_checkpoint("t1").unwrap().unwrap();
        assert_eq!(latest.messages[0].text(), "remember me");
        assert_eq!(db.titles().unwrap()["t1"], "remember me");
    }
}
