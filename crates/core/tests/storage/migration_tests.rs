use super::Storage;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_db_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("retriever-{name}-{}-{nanos}.db", process::id()))
}

fn applied_count(storage: &Storage, version: &str) -> i64 {
    storage
        .conn
        .query_row(
            "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
            [version],
            |row| row.get(0),
        )
        .expect("count migration")
}

#[test]
fn init_tracks_schema_migrations_and_is_idempotent() {
    let storage = Storage::open_in_memory().expect("open in memory");
    storage.init().expect("first init");
    storage.init().expect("second init");

    assert_eq!(applied_count(&storage, "001_retrieval_logs"), 1);
    assert_eq!(applied_count(&storage, "002_retrieval_logs_indexes"), 1);

    let index_count: i64 = storage
        .conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_retrieval_logs_%'",
            [],
            |row| row.get(0),
        )
        .expect("count indexes");
    assert_eq!(index_count, 2);
}

#[test]
fn init_on_file_keeps_rows_across_reopen() {
    let path = temp_db_path("reopen");
    {
        let storage = Storage::open(&path).expect("open file");
        storage.init().expect("init");
        storage
            .conn
            .execute(
                "INSERT INTO retrieval_logs (timestamp, backend_url, requester_identity, response_status)
                 VALUES ('2025-01-01T00:00:00.000Z', 'https://a', '0xabc', 200)",
                [],
            )
            .expect("insert raw row");
    }

    let reopened = Storage::open(&path).expect("reopen file");
    reopened.init().expect("init again");
    assert_eq!(reopened.retrieval_log_count().expect("count"), 1);
    assert_eq!(applied_count(&reopened, "001_retrieval_logs"), 1);

    drop(reopened);
    let _ = fs::remove_file(&path);
}
