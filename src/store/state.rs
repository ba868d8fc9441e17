//! Typed accessors over the `State` key/value table — the Rust
//! re-architecture of `original_source/fetcher/github_searcher_state.go`'s
//! generic `getFromState[T]`/`setToState[T]` string-keyed bag into one
//! strongly-typed accessor per key, each with its own default.

use crate::store::schema::Store;
use crate::window::{CreationDateRange, DEFAULT_MAX_STARS, DEFAULT_SEARCH_WINDOW};
use chrono::{DateTime, Utc};
use ohno::IntoAppError;
use rusqlite::{params, OptionalExtension};

const MAX_STARS_KEY: &str = "max_stars";
const SEARCH_WINDOW_KEY: &str = "search_window";
const DAY_START_KEY: &str = "day_start";
const DAYS_WINDOW_KEY: &str = "days_window";
const GETREPO_RATELIMIT_RESET_KEY: &str = "getrepo_ratelimit_reset";
const GETREPO_RATELIMIT_REMAINING_KEY: &str = "getrepo_ratelimit_remaining";

/// Default lookup-endpoint rate-limit remaining, used only until the first
/// real observation is persisted.
const DEFAULT_GETREPO_RATELIMIT_REMAINING: i64 = 6000;

fn get_i64(conn: &rusqlite::Connection, key: &str) -> crate::Result<Option<i64>> {
    conn.query_row("SELECT Value FROM State WHERE Name = ?1", params![key], |row| row.get::<_, String>(0))
        .optional()
        .into_app_err_with(|| format!("reading state key '{key}'"))?
        .map(|raw| serde_json::from_str(&raw).into_app_err_with(|| format!("decoding state key '{key}'")))
        .transpose()
}

fn set_i64(conn: &rusqlite::Connection, key: &str, value: i64) -> crate::Result<()> {
    let raw = serde_json::to_string(&value).expect("i64 always serializes");
    conn.execute("INSERT OR REPLACE INTO State(Name, Value) VALUES(?1, ?2)", params![key, raw])
        .into_app_err_with(|| format!("writing state key '{key}'"))?;
    Ok(())
}

impl Store {
    /// The current upper bound of the star sweep. Defaults to
    /// [`DEFAULT_MAX_STARS`].
    pub async fn get_max_stars(&self) -> crate::Result<i64> {
        self.with_connection(|conn| Ok(get_i64(conn, MAX_STARS_KEY)?.unwrap_or(DEFAULT_MAX_STARS))).await
    }

    /// Sets `max_stars`. Per the original behavior, changing it resets the
    /// creation-date range to its default — a new star band starts its
    /// date sweep from scratch.
    pub async fn set_max_stars(&self, stars: i64, now: DateTime<Utc>) -> crate::Result<()> {
        self.with_connection(move |conn| {
            let current = get_i64(conn, MAX_STARS_KEY)?.unwrap_or(DEFAULT_MAX_STARS);
            if stars != current {
                let default_range = CreationDateRange::default_range(now);
                set_i64(conn, DAY_START_KEY, default_range.day_start)?;
                set_i64(conn, DAYS_WINDOW_KEY, default_range.days_window)?;
            }
            set_i64(conn, MAX_STARS_KEY, stars)
        })
        .await
    }

    /// The current span subtracted from `max_stars` to form
    /// `[minStars, maxStars]`. Defaults to [`DEFAULT_SEARCH_WINDOW`].
    pub async fn get_search_window(&self) -> crate::Result<i64> {
        self.with_connection(|conn| Ok(get_i64(conn, SEARCH_WINDOW_KEY)?.unwrap_or(DEFAULT_SEARCH_WINDOW))).await
    }

    pub async fn set_search_window(&self, window: i64) -> crate::Result<()> {
        self.with_connection(move |conn| set_i64(conn, SEARCH_WINDOW_KEY, window)).await
    }

    /// The current creation-date slice. Defaults to a range spanning from
    /// the founding epoch through two days from now.
    pub async fn get_creation_date_range(&self, now: DateTime<Utc>) -> crate::Result<CreationDateRange> {
        self.with_connection(move |conn| {
            let day_start = get_i64(conn, DAY_START_KEY)?;
            let days_window = get_i64(conn, DAYS_WINDOW_KEY)?;
            Ok(match (day_start, days_window) {
                (Some(day_start), Some(days_window)) => CreationDateRange::new(day_start, days_window),
                _ => CreationDateRange::default_range(now),
            })
        })
        .await
    }

    pub async fn save_creation_date_range(&self, range: CreationDateRange) -> crate::Result<()> {
        self.with_connection(move |conn| {
            set_i64(conn, DAY_START_KEY, range.day_start)?;
            set_i64(conn, DAYS_WINDOW_KEY, range.days_window)
        })
        .await
    }

    /// The lookup endpoint's last observed rate-limit position, persisted
    /// separately from the search endpoint's (runtime-only) state because
    /// the sweeper runs intermittently, possibly across process restarts.
    pub async fn get_repo_ratelimit(&self, now: DateTime<Utc>) -> crate::Result<(DateTime<Utc>, i64)> {
        self.with_connection(move |conn| {
            let reset = get_i64(conn, GETREPO_RATELIMIT_RESET_KEY)?
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(now + chrono::Duration::hours(1));
            let remaining = get_i64(conn, GETREPO_RATELIMIT_REMAINING_KEY)?.unwrap_or(DEFAULT_GETREPO_RATELIMIT_REMAINING);
            Ok((reset, remaining))
        })
        .await
    }

    pub async fn set_repo_ratelimit(&self, reset: DateTime<Utc>, remaining: i64) -> crate::Result<()> {
        self.with_connection(move |conn| {
            set_i64(conn, GETREPO_RATELIMIT_RESET_KEY, reset.timestamp())?;
            set_i64(conn, GETREPO_RATELIMIT_REMAINING_KEY, remaining)
        })
        .await
    }
}
