//! Optional raw request/response/SQL dump sinks, enabled individually via
//! `--enable-request-log`, `--enable-response-log`, and `--enable-sql-log`.
//!
//! These are deliberately not a second logging framework: they're append-mode
//! files under `logs/`, opened once at startup and shared behind a `Mutex` —
//! the Rust equivalent of the original's `reqLogger`/`resLogger`/xorm SQL
//! logger, which wrote the same kind of raw dumps to disk.

use ohno::IntoAppError;
use std::fs::{File, OpenOptions};
use std::sync::{Arc, Mutex};

fn open_append(path: &str) -> crate::Result<Arc<Mutex<File>>> {
    std::fs::create_dir_all("logs").into_app_err("creating logs directory")?;
    let file = OpenOptions::new().create(true).append(true).open(path).into_app_err_with(|| format!("opening log file '{path}'"))?;
    Ok(Arc::new(Mutex::new(file)))
}

/// Opens `logs/requests.log` for `--enable-request-log`.
pub fn open_request_log() -> crate::Result<Arc<Mutex<File>>> {
    open_append("logs/requests.log")
}

/// Opens `logs/responses.log` for `--enable-response-log`.
pub fn open_response_log() -> crate::Result<Arc<Mutex<File>>> {
    open_append("logs/responses.log")
}

/// Opens `logs/sql.log` for `--enable-sql-log`.
pub fn open_sql_log() -> crate::Result<Arc<Mutex<File>>> {
    open_append("logs/sql.log")
}
