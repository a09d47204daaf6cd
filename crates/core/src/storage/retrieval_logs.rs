use rusqlite::{Result, Row};

use super::{RetrievalLog, Storage, StoredRetrievalLog};

impl Storage {
    pub fn insert_retrieval_log(&self, log: &RetrievalLog) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO retrieval_logs (
                timestamp, backend_url, requester_identity, response_status, egress_bytes,
                cache_miss, fetch_ttfb, fetch_ttlb, handler_ttfb, origin_country_code
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            (
                &log.timestamp,
                &log.backend_url,
                &log.requester_identity,
                log.response_status,
                log.egress_bytes,
                log.cache_miss,
                log.fetch_ttfb,
                log.fetch_ttlb,
                log.handler_ttfb,
                &log.origin_country_code,
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn retrieval_log_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(1) FROM retrieval_logs", [], |row| row.get(0))
    }

    pub fn list_retrieval_logs(&self, limit: i64) -> Result<Vec<StoredRetrievalLog>> {
        let normalized_limit = if limit <= 0 { 200 } else { limit.min(1000) };
        let mut stmt = self.conn.prepare(
            "SELECT
                id, timestamp, backend_url, requester_identity, response_status, egress_bytes,
                cache_miss, fetch_ttfb, fetch_ttlb, handler_ttfb, origin_country_code
             FROM retrieval_logs
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let mut rows = stmt.query([normalized_limit])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map_retrieval_log_row(row)?);
        }
        Ok(out)
    }

    pub fn list_retrieval_logs_by_requester(
        &self,
        requester_identity: &str,
    ) -> Result<Vec<StoredRetrievalLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                id, timestamp, backend_url, requester_identity, response_status, egress_bytes,
                cache_miss, fetch_ttfb, fetch_ttlb, handler_ttfb, origin_country_code
             FROM retrieval_logs
             WHERE requester_identity = ?1
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([requester_identity])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map_retrieval_log_row(row)?);
        }
        Ok(out)
    }
}

fn map_retrieval_log_row(row: &Row<'_>) -> Result<StoredRetrievalLog> {
    Ok(StoredRetrievalLog {
        id: row.get(0)?,
        log: RetrievalLog {
            timestamp: row.get(1)?,
            backend_url: row.get(2)?,
            requester_identity: row.get(3)?,
            response_status: row.get(4)?,
            egress_bytes: row.get(5)?,
            cache_miss: row.get(6)?,
            fetch_ttfb: row.get(7)?,
            fetch_ttlb: row.get(8)?,
            handler_ttfb: row.get(9)?,
            origin_country_code: row.get(10)?,
        },
    })
}
