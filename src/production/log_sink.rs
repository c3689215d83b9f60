//! SQLite-backed notification log

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::notification::DeliveryLogEntry;
use crate::traits::{LogSink, SinkError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notification_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        notification_id TEXT NOT NULL,
        provider_id TEXT NOT NULL,
        provider_type TEXT NOT NULL,
        recipient TEXT NOT NULL,
        message TEXT NOT NULL,
        subject TEXT,
        metadata TEXT,
        priority TEXT NOT NULL DEFAULT 'normal',
        status TEXT NOT NULL,
        error_message TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        delivered_at TEXT,
        is_test INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_notification_logs_provider_id
        ON notification_logs (provider_id);

    CREATE INDEX IF NOT EXISTS idx_notification_logs_created_at
        ON notification_logs (created_at);

    CREATE INDEX IF NOT EXISTS idx_notification_logs_status
        ON notification_logs (status);

    CREATE INDEX IF NOT EXISTS idx_notification_logs_is_test
        ON notification_logs (is_test);";

/// Row as read back for operators and tests
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub notification_id: String,
    pub provider_id: String,
    pub provider_type: String,
    pub recipient: String,
    pub status: String,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub is_test: bool,
    pub created_at: String,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

fn db_error(e: rusqlite::Error) -> SinkError {
    SinkError::DatabaseError(e.to_string())
}

impl SqliteLogSink {
    /// Open or create the log database, creating parent directories
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SinkError::DatabaseError(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path).map_err(db_error)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;

        tracing::info!(path = %path.display(), "Opened notification log database");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn count(&self) -> Result<usize, SinkError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notification_logs", [], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count as usize)
    }

    /// Newest rows first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredLog>, SinkError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT notification_id, provider_id, provider_type, recipient, status,
                        error_message, attempts, is_test, created_at
                 FROM notification_logs
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(db_error)?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredLog {
                    notification_id: row.get(0)?,
                    provider_id: row.get(1)?,
                    provider_type: row.get(2)?,
                    recipient: row.get(3)?,
                    status: row.get(4)?,
                    error_message: row.get(5)?,
                    attempts: row.get(6)?,
                    is_test: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        Ok(rows)
    }

    /// Delete rows created more than `days` days ago; returns rows deleted
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize, SinkError> {
        self.cleanup_before(Utc::now() - ChronoDuration::days(i64::from(days)))
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SinkError> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM notification_logs WHERE created_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(db_error)?;
        if deleted > 0 {
            tracing::info!(deleted, "Removed expired notification logs");
        }
        Ok(deleted)
    }
}

impl LogSink for SqliteLogSink {
    fn write_batch(&self, entries: &[DeliveryLogEntry]) -> Result<usize, SinkError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_error)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO notification_logs (
                        notification_id, provider_id, provider_type, recipient, message, subject,
                        metadata, priority, status, error_message, attempts, created_at, delivered_at, is_test
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .map_err(db_error)?;

            for entry in entries {
                let n = &entry.notification;
                let metadata = if n.metadata.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::to_string(&n.metadata)
                            .map_err(|e| SinkError::SerializationError(e.to_string()))?,
                    )
                };

                stmt.execute(params![
                    n.id,
                    n.provider_id,
                    entry.provider_type.as_str(),
                    n.recipient,
                    n.message,
                    n.subject,
                    metadata,
                    n.priority.as_str(),
                    entry.status.as_str(),
                    entry.error_message,
                    entry.attempt_count,
                    n.created_at.to_rfc3339(),
                    entry.delivered_at.map(|t| t.to_rfc3339()),
                    entry.is_test,
                ])
                .map_err(db_error)?;
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit().map_err(db_error)?;

        tracing::debug!(rows = entries.len(), "Committed notification log batch");
        Ok(entries.len())
    }
}
