use retriever_core::storage::Storage;
use std::fmt::Display;
use std::io;
use std::path::Path;

use crate::process_env::ENV_DB_PATH;

fn storage_error(action: &str, path: &str, err: impl Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("{action} failed: {path} ({err})"),
    )
}

pub(crate) fn open_telemetry_storage() -> io::Result<Storage> {
    let path = std::env::var(ENV_DB_PATH).map_err(|_| {
        io::Error::new(io::ErrorKind::NotFound, format!("{ENV_DB_PATH} not set"))
    })?;
    open_telemetry_storage_at(&path)
}

/// Opens the telemetry database and applies pending migrations. Runs once at
/// startup; the connection is then shared by every request.
pub(crate) fn open_telemetry_storage_at(path: &str) -> io::Result<Storage> {
    if !Path::new(path).exists() {
        log::info!("event=storage_create path={}", path);
    }
    let storage = Storage::open(path).map_err(|err| storage_error("open storage", path, err))?;
    storage
        .init()
        .map_err(|err| storage_error("storage init", path, err))?;
    Ok(storage)
}
