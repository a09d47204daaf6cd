use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

mod retrieval_logs;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_retrieval_logs",
        "CREATE TABLE IF NOT EXISTS retrieval_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            backend_url TEXT NOT NULL,
            requester_identity TEXT NOT NULL,
            response_status INTEGER NOT NULL,
            egress_bytes INTEGER,
            cache_miss INTEGER,
            fetch_ttfb REAL,
            fetch_ttlb REAL,
            handler_ttfb REAL,
            origin_country_code TEXT
        );",
    ),
    (
        "002_retrieval_logs_indexes",
        "CREATE INDEX IF NOT EXISTS idx_retrieval_logs_timestamp
            ON retrieval_logs(timestamp);
         CREATE INDEX IF NOT EXISTS idx_retrieval_logs_requester_backend
            ON retrieval_logs(requester_identity, backend_url);",
    ),
];

/// One telemetry row. Append-only: there is no update or delete path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalLog {
    pub timestamp: String,
    pub backend_url: String,
    pub requester_identity: String,
    pub response_status: i64,
    pub egress_bytes: Option<i64>,
    pub cache_miss: Option<bool>,
    pub fetch_ttfb: Option<f64>,
    pub fetch_ttlb: Option<f64>,
    pub handler_ttfb: Option<f64>,
    pub origin_country_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRetrievalLog {
    pub id: i64,
    pub log: RetrievalLog,
}

pub struct Storage {
    conn: Connection,
}

/// ISO-8601 UTC timestamp with millisecond precision, e.g. `2025-06-01T08:30:00.123Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;
        for (version, sql) in MIGRATIONS {
            if self.migration_applied(version)? {
                continue;
            }
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                (*version, now_iso()),
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    fn migration_applied(&self, version: &str) -> Result<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            [version],
            |row| row.get(0),
        )
    }
}

#[cfg(test)]
#[path = "../../tests/storage/migration_tests.rs"]
mod migration_tests;
