//! Database initialization: pragmas, table creation, and the advisory
//! single-writer lock.
//!
//! Pragma choices (`WAL`, `busy_timeout=1000`, `synchronous=NORMAL`) are
//! ported from `original_source/fetcher/db.go`'s xorm/sqlite3 connection
//! string — the one place the original system commits to a concrete
//! storage format.

use camino::Utf8Path;
use fs4::fs_std::FileExt;
use ohno::IntoAppError;
use rusqlite::Connection;
use std::fs::{File, OpenOptions};
use std::sync::{Arc, Mutex};

const LOG_TARGET: &str = "store";

/// Guard holding the advisory exclusive lock on the database directory.
/// Released when dropped.
#[derive(Debug)]
struct WriterLock(File);

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            log::warn!(target: LOG_TARGET, "could not release database writer lock: {e:#}");
        }
    }
}

/// The persistent SQLite-backed store: `Repo` rows and `State` key/value
/// pairs. Exclusively owned by one fetcher process at a time.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    _lock: Arc<WriterLock>,
}

impl Store {
    /// Opens (creating if necessary) the database at `path`, applies the
    /// required pragmas, creates the `Repo`/`State` tables and their
    /// downstream-consumption indexes, and acquires the single-writer lock.
    pub async fn open(path: &Utf8Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent).into_app_err_with(|| format!("creating database directory '{parent}'"))?;
        }

        let lock_path = format!("{path}.lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .into_app_err_with(|| format!("opening database writer lock file '{lock_path}'"))?;

        let lock_file = tokio::task::spawn_blocking(move || {
            lock_file
                .try_lock_exclusive()
                .into_app_err_with(|| format!("acquiring exclusive database writer lock at '{lock_path}' — is another fetcher running?"))?;
            Ok::<_, ohno::AppError>(lock_file)
        })
        .await
        .into_app_err("lock task panicked")??;

        let path = path.to_owned();
        let conn = tokio::task::spawn_blocking(move || open_and_initialize(&path))
            .await
            .into_app_err("database init task panicked")??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _lock: Arc::new(WriterLock(lock_file)),
        })
    }

    /// Runs a blocking closure against the connection on a blocking-task
    /// thread, using the same `spawn_blocking` convention as the advisory
    /// file locking above.
    pub(crate) async fn with_connection<T, F>(&self, f: F) -> crate::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> crate::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("connection mutex not poisoned");
            f(&conn)
        })
        .await
        .into_app_err("database task panicked")?
    }

    /// Installs a raw SQL trace sink, enabled via `--enable-sql-log`. Every
    /// statement SQLite executes is appended to `sink`, one per line — the
    /// equivalent of the original's xorm SQL logger.
    pub async fn enable_sql_log(&self, sink: Arc<Mutex<File>>) -> crate::Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("connection mutex not poisoned");
            conn.trace(Some(Box::new(move |sql| {
                if let Ok(mut file) = sink.lock() {
                    use std::io::Write;
                    let _ = writeln!(file, "{sql}");
                }
            })));
        })
        .await
        .into_app_err("sql log task panicked")
    }
}

fn open_and_initialize(path: &Utf8Path) -> crate::Result<Connection> {
    let conn = Connection::open(path).into_app_err_with(|| format!("opening database at '{path}'"))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .into_app_err("setting journal_mode=WAL")?;
    conn.pragma_update(None, "busy_timeout", 1000).into_app_err("setting busy_timeout")?;
    conn.pragma_update(None, "synchronous", "NORMAL").into_app_err("setting synchronous=NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS Repo (
            Id                       INTEGER PRIMARY KEY,
            FullName                 TEXT NOT NULL,
            Name                     TEXT NOT NULL,
            Description              TEXT,
            Homepage                 TEXT,
            Language                 TEXT,
            GithubLink               TEXT NOT NULL,
            Stargazers               INTEGER NOT NULL,
            Topics                   TEXT NOT NULL,
            Archived                 INTEGER NOT NULL,
            OpenIssues               INTEGER NOT NULL,
            CreatedAt                TEXT NOT NULL,
            RepoPushedAt             TEXT NOT NULL,
            RepoUpdatedAt            TEXT NOT NULL,
            OwnerLogin               TEXT NOT NULL,
            OwnerAvatarUrl           TEXT NOT NULL,
            OwnerType                TEXT NOT NULL,
            LicenseSpdxId            TEXT,
            LicenseName              TEXT,
            FirstFetchedFromGithubAt TEXT NOT NULL,
            LastFetchedFromGithubAt  TEXT NOT NULL,
            NotSeenSinceCounter      INTEGER NOT NULL DEFAULT 0,
            GetRepoApiLastModifiedHeader TEXT
        );

        CREATE TABLE IF NOT EXISTS State (
            Name  TEXT PRIMARY KEY NOT NULL,
            Value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS LanguageStargazersId
            ON Repo(Language, Stargazers DESC, Id, NotSeenSinceCounter);
        CREATE INDEX IF NOT EXISTS StargazersId
            ON Repo(Stargazers DESC, Id, NotSeenSinceCounter);
        ",
    )
    .into_app_err("creating schema")?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_tables_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();

        let store = Store::open(&path).await.unwrap();

        let count: i64 = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('Repo', 'State')",
                    [],
                    |row| row.get(0),
                )
                .into_app_err("counting tables")
            })
            .await
            .unwrap();

        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn second_open_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();

        let _first = Store::open(&path).await.unwrap();
        let second = Store::open(&path).await;
        assert!(second.is_err());
    }
}
