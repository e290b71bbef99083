use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use crate::storage::{ExecutedCommand, IndexedFileState};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS commands (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        tool_use_id  TEXT NOT NULL UNIQUE,
        command      TEXT NOT NULL,
        description  TEXT,
        cwd          TEXT,
        stdout       TEXT,
        stderr       TEXT,
        is_error     INTEGER NOT NULL DEFAULT 0,
        timestamp    TEXT,
        session_id   TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_commands_command ON commands(command);
    CREATE INDEX IF NOT EXISTS idx_commands_timestamp ON commands(timestamp DESC);

    CREATE TABLE IF NOT EXISTS indexed_files (
        path    TEXT PRIMARY KEY,
        offset  INTEGER NOT NULL,
        mtime   INTEGER NOT NULL
    );
";

// External-content FTS table; rows are only ever inserted, so one trigger suffices.
const FTS_SCHEMA: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS commands_fts USING fts5(
        command,
        description,
        content='commands',
        content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS commands_fts_ai AFTER INSERT ON commands BEGIN
        INSERT INTO commands_fts(rowid, command, description)
        VALUES (new.id, new.command, new.description);
    END;
";

const SELECT_COMMAND: &str = "SELECT id, tool_use_id, command, description, cwd, stdout, stderr,
        is_error, timestamp, session_id FROM commands";

/// Row filter for reading commands back out of the store.
#[derive(Debug, Default, Clone)]
pub struct CommandFilter {
    pub cwd: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub commands: i64,
    pub distinct_commands: i64,
    pub failed_commands: i64,
    pub indexed_files: i64,
}

pub struct StoreManager {
    conn: Connection,
    fts_enabled: bool,
}

impl StoreManager {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create db dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open db {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("create schema")?;

        // Builds without FTS5 still work; relevance then degrades to substring matching.
        let fts_enabled = match conn.execute_batch(FTS_SCHEMA) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("full-text index unavailable: {}", e);
                false
            }
        };

        Ok(Self { conn, fts_enabled })
    }

    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Insert a command unless its correlation id is already stored.
    /// Returns whether a row was written.
    #[cfg(test)]
    pub fn insert_command(&self, command: &ExecutedCommand) -> Result<bool> {
        insert_command(&self.conn, command)
    }

    /// Persist one parse pass over a file: the extracted commands and the new
    /// checkpoint are committed together or not at all.
    pub fn ingest_batch(
        &mut self,
        commands: &[ExecutedCommand],
        state: &IndexedFileState,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for command in commands {
            if insert_command(&tx, command)? {
                inserted += 1;
            }
        }
        upsert_file_state(&tx, state)?;
        tx.commit().context("commit ingest batch")?;
        Ok(inserted)
    }

    pub fn file_state(&self, path: &str) -> Result<Option<IndexedFileState>> {
        let state = self
            .conn
            .query_row(
                "SELECT path, offset, mtime FROM indexed_files WHERE path = ?1",
                params![path],
                |row| {
                    Ok(IndexedFileState {
                        path: row.get(0)?,
                        offset: row.get::<_, i64>(1)?.max(0) as u64,
                        mtime: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    #[cfg(test)]
    pub fn set_file_state(&self, state: &IndexedFileState) -> Result<()> {
        upsert_file_state(&self.conn, state)
    }

    /// Commands newest first; rows without a timestamp sort last.
    pub fn commands(&self, filter: &CommandFilter) -> Result<Vec<ExecutedCommand>> {
        let mut sql = format!("{} WHERE (?1 IS NULL OR cwd = ?1)", SELECT_COMMAND);
        sql.push_str(" ORDER BY timestamp IS NULL, timestamp DESC, id DESC");
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        sql.push_str(" LIMIT ?2");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.cwd, limit], row_to_command)?;
        let mut commands = Vec::new();
        for row in rows {
            commands.push(row?);
        }
        Ok(commands)
    }

    /// BM25 relevance of every row matching `query`, keyed by row id.
    /// Higher is better. Empty when the full-text index is unavailable.
    pub fn fts_scores(&self, query: &str) -> Result<HashMap<i64, f64>> {
        let mut scores = HashMap::new();
        if !self.fts_enabled {
            return Ok(scores);
        }
        let Some(expr) = fts_query(query) else {
            return Ok(scores);
        };

        let mut stmt = self.conn.prepare(
            "SELECT rowid, bm25(commands_fts) FROM commands_fts WHERE commands_fts MATCH ?1",
        )?;
        let rows = stmt.query_map(params![expr], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;
        for row in rows {
            let (id, rank) = row?;
            // bm25() is lower-is-better
            scores.insert(id, -rank);
        }
        Ok(scores)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (commands, distinct_commands, failed_commands): (i64, i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT command), COALESCE(SUM(is_error), 0) FROM commands",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let indexed_files: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM indexed_files", [], |row| row.get(0))?;
        Ok(StoreStats {
            commands,
            distinct_commands,
            failed_commands,
            indexed_files,
        })
    }
}

fn insert_command(conn: &Connection, command: &ExecutedCommand) -> Result<bool> {
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO commands
                (tool_use_id, command, description, cwd, stdout, stderr, is_error, timestamp, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                command.tool_use_id,
                command.command,
                command.description,
                command.cwd,
                command.stdout,
                command.stderr,
                command.is_error,
                command.timestamp.map(format_timestamp),
                command.session_id,
            ],
        )
        .with_context(|| format!("insert command {}", command.tool_use_id))?;
    Ok(changed > 0)
}

fn upsert_file_state(conn: &Connection, state: &IndexedFileState) -> Result<()> {
    conn.execute(
        "INSERT INTO indexed_files (path, offset, mtime) VALUES (?1, ?2, ?3)
         ON CONFLICT(path) DO UPDATE SET offset = excluded.offset, mtime = excluded.mtime",
        params![state.path, state.offset as i64, state.mtime],
    )
    .with_context(|| format!("update checkpoint for {}", state.path))?;
    Ok(())
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<ExecutedCommand> {
    let timestamp: Option<String> = row.get(8)?;
    Ok(ExecutedCommand {
        id: Some(row.get(0)?),
        tool_use_id: row.get(1)?,
        command: row.get(2)?,
        description: row.get(3)?,
        cwd: row.get(4)?,
        stdout: row.get(5)?,
        stderr: row.get(6)?,
        is_error: row.get(7)?,
        timestamp: timestamp.as_deref().and_then(parse_timestamp),
        session_id: row.get(9)?,
    })
}

// Fixed-width UTC form so that string order is chronological order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Turn free text into an FTS5 expression: every token is quoted so
/// operators and punctuation in shell commands are matched literally.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
