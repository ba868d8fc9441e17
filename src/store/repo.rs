//! The canonical `Repo` row and its persistence operations.
//!
//! Grounded on `original_source/fetcher/model.go` (column shape) and
//! `original_source/fetcher/searcher.go`'s `save()` (the upsert-plus-rename-
//! detection transaction) and `original_source/fetcher/deleted_repositories.go`
//! (the likely-deleted selection query).

use crate::github::ApiRepo;
use crate::store::schema::Store;
use chrono::{DateTime, Utc};
use ohno::IntoAppError;
use rusqlite::{params, OptionalExtension, Row};

/// One discovered repository, as stored in the `Repo` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Repo {
    pub id: i64,
    pub full_name: String,
    pub name: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub language: Option<String>,
    pub github_link: String,
    pub stargazers: i64,
    pub topics: Vec<String>,
    pub archived: bool,
    pub open_issues: i64,
    pub created_at: DateTime<Utc>,
    pub repo_pushed_at: DateTime<Utc>,
    pub repo_updated_at: DateTime<Utc>,
    pub owner_login: String,
    pub owner_avatar_url: String,
    pub owner_type: String,
    pub license_spdx_id: Option<String>,
    pub license_name: Option<String>,
    pub first_fetched_from_github_at: DateTime<Utc>,
    pub last_fetched_from_github_at: DateTime<Utc>,
    pub not_seen_since_counter: i64,
    pub get_repo_api_last_modified_header: Option<String>,
}

impl Repo {
    /// Builds a fresh row from a search/lookup API item, stamping both
    /// fetch timestamps to `now` — the shape used for a brand-new insert.
    pub fn from_api(item: ApiRepo, now: DateTime<Utc>) -> Self {
        let license = item.license.unwrap_or_default();
        Self {
            id: item.id,
            full_name: item.full_name,
            name: item.name,
            description: item.description,
            homepage: item.homepage,
            language: item.language,
            github_link: item.html_url,
            stargazers: item.stargazers_count,
            topics: item.topics,
            archived: item.archived,
            open_issues: item.open_issues_count,
            created_at: item.created_at,
            repo_pushed_at: item.pushed_at,
            repo_updated_at: item.updated_at,
            owner_login: item.owner.login,
            owner_avatar_url: item.owner.avatar_url,
            owner_type: item.owner.kind,
            license_spdx_id: license.spdx_id,
            license_name: license.name,
            first_fetched_from_github_at: now,
            last_fetched_from_github_at: now,
            not_seen_since_counter: 0,
            get_repo_api_last_modified_header: None,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("Id")?,
            full_name: row.get("FullName")?,
            name: row.get("Name")?,
            description: row.get("Description")?,
            homepage: row.get("Homepage")?,
            language: row.get("Language")?,
            github_link: row.get("GithubLink")?,
            stargazers: row.get("Stargazers")?,
            topics: decode_topics(row.get::<_, String>("Topics")?),
            archived: row.get("Archived")?,
            open_issues: row.get("OpenIssues")?,
            created_at: row.get("CreatedAt")?,
            repo_pushed_at: row.get("RepoPushedAt")?,
            repo_updated_at: row.get("RepoUpdatedAt")?,
            owner_login: row.get("OwnerLogin")?,
            owner_avatar_url: row.get("OwnerAvatarUrl")?,
            owner_type: row.get("OwnerType")?,
            license_spdx_id: row.get("LicenseSpdxId")?,
            license_name: row.get("LicenseName")?,
            first_fetched_from_github_at: row.get("FirstFetchedFromGithubAt")?,
            last_fetched_from_github_at: row.get("LastFetchedFromGithubAt")?,
            not_seen_since_counter: row.get("NotSeenSinceCounter")?,
            get_repo_api_last_modified_header: row.get("GetRepoApiLastModifiedHeader")?,
        })
    }
}

fn encode_topics(topics: &[String]) -> String {
    serde_json::to_string(topics).expect("Vec<String> always serializes")
}

fn decode_topics(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

impl Store {
    /// Persists one search response's items: upserts each by `Id`, and
    /// removes any other live row sharing the same `FullName` (the
    /// rename/recreate detection rule). Runs in a single transaction.
    pub async fn save_items(&self, items: Vec<ApiRepo>, now: DateTime<Utc>) -> crate::Result<()> {
        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction().into_app_err("starting save transaction")?;
            for item in items {
                let repo = Repo::from_api(item, now);
                upsert(&tx, &repo, now)?;
                tx.execute(
                    "DELETE FROM Repo WHERE Id != ?1 AND FullName = ?2",
                    params![repo.id, repo.full_name],
                )
                .into_app_err_with(|| format!("deleting duplicate rows for '{}'", repo.full_name))?;
            }
            tx.commit().into_app_err("committing save transaction")?;
            Ok(())
        })
        .await
    }

    /// Fetches up to `limit` rows with `NotSeenSinceCounter > 2`, ordered by
    /// counter descending then `Id` ascending — the Deletion Sweeper's
    /// candidate selection.
    pub async fn likely_deleted(&self, limit: i64) -> crate::Result<Vec<Repo>> {
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM Repo WHERE NotSeenSinceCounter > 2
                     ORDER BY NotSeenSinceCounter DESC, Id ASC
                     LIMIT ?1",
                )
                .into_app_err("preparing likely-deleted query")?;
            let rows = stmt
                .query_map(params![limit], Repo::from_row)
                .into_app_err("querying likely-deleted rows")?;
            rows.collect::<Result<Vec<_>, _>>().into_app_err("reading likely-deleted rows")
        })
        .await
    }

    /// Permanently removes a row — the deletion sweeper's "surely gone"
    /// outcome.
    pub async fn delete(&self, id: i64) -> crate::Result<()> {
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM Repo WHERE Id = ?1", params![id]).into_app_err_with(|| format!("deleting repo {id}"))?;
            Ok(())
        })
        .await
    }

    /// Overwrites every column with a freshly-fetched repository, except
    /// `Id`, which always keeps the value assigned by the search endpoint —
    /// the lookup endpoint returns a different id for the same repository.
    pub async fn refresh_from_lookup(&self, id: i64, item: ApiRepo, last_modified: Option<String>, now: DateTime<Utc>) -> crate::Result<()> {
        self.with_connection(move |conn| {
            let mut repo = Repo::from_api(item, now);
            repo.id = id;
            repo.get_repo_api_last_modified_header = last_modified;
            repo.first_fetched_from_github_at = first_fetched_at(conn, id)?.unwrap_or(now);
            upsert(conn, &repo, now)
        })
        .await
    }

    /// Refreshes only the `Last-Modified` header, `LastFetchedFromGithubAt`,
    /// and resets `NotSeenSinceCounter` — the deletion sweeper's "unchanged"
    /// (304) outcome.
    pub async fn mark_unchanged(&self, id: i64, last_modified: Option<String>, now: DateTime<Utc>) -> crate::Result<()> {
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE Repo SET LastFetchedFromGithubAt = ?1, NotSeenSinceCounter = 0, GetRepoApiLastModifiedHeader = ?2 WHERE Id = ?3",
                params![now, last_modified, id],
            )
            .into_app_err_with(|| format!("marking repo {id} unchanged"))?;
            Ok(())
        })
        .await
    }

    /// Increments `NotSeenSinceCounter` for every row — called once at the
    /// end of a completed crawl cycle.
    pub async fn increment_not_seen_counters(&self) -> crate::Result<()> {
        self.with_connection(|conn| {
            conn.execute("UPDATE Repo SET NotSeenSinceCounter = NotSeenSinceCounter + 1", []).into_app_err("incrementing not-seen counters")?;
            Ok(())
        })
        .await
    }
}

fn first_fetched_at(conn: &rusqlite::Connection, id: i64) -> crate::Result<Option<DateTime<Utc>>> {
    conn.query_row("SELECT FirstFetchedFromGithubAt FROM Repo WHERE Id = ?1", params![id], |row| row.get(0))
        .optional()
        .into_app_err_with(|| format!("reading first-fetched timestamp for repo {id}"))
}

fn upsert(conn: &rusqlite::Connection, repo: &Repo, now: DateTime<Utc>) -> crate::Result<()> {
    let exists: bool = conn
        .query_row("SELECT 1 FROM Repo WHERE Id = ?1", params![repo.id], |_| Ok(()))
        .optional()
        .into_app_err_with(|| format!("checking existence of repo {}", repo.id))?
        .is_some();

    let first_fetched_at = if exists { first_fetched_at(conn, repo.id)?.unwrap_or(now) } else { now };

    conn.execute(
        "INSERT INTO Repo (
            Id, FullName, Name, Description, Homepage, Language, GithubLink, Stargazers, Topics,
            Archived, OpenIssues, CreatedAt, RepoPushedAt, RepoUpdatedAt,
            OwnerLogin, OwnerAvatarUrl, OwnerType, LicenseSpdxId, LicenseName,
            FirstFetchedFromGithubAt, LastFetchedFromGithubAt, NotSeenSinceCounter, GetRepoApiLastModifiedHeader
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
        )
        ON CONFLICT(Id) DO UPDATE SET
            FullName = excluded.FullName, Name = excluded.Name, Description = excluded.Description,
            Homepage = excluded.Homepage, Language = excluded.Language, GithubLink = excluded.GithubLink,
            Stargazers = excluded.Stargazers, Topics = excluded.Topics, Archived = excluded.Archived,
            OpenIssues = excluded.OpenIssues, CreatedAt = excluded.CreatedAt, RepoPushedAt = excluded.RepoPushedAt,
            RepoUpdatedAt = excluded.RepoUpdatedAt, OwnerLogin = excluded.OwnerLogin,
            OwnerAvatarUrl = excluded.OwnerAvatarUrl, OwnerType = excluded.OwnerType,
            LicenseSpdxId = excluded.LicenseSpdxId, LicenseName = excluded.LicenseName,
            LastFetchedFromGithubAt = excluded.LastFetchedFromGithubAt,
            NotSeenSinceCounter = excluded.NotSeenSinceCounter,
            GetRepoApiLastModifiedHeader = excluded.GetRepoApiLastModifiedHeader",
        params![
            repo.id,
            repo.full_name,
            repo.name,
            repo.description,
            repo.homepage,
            repo.language,
            repo.github_link,
            repo.stargazers,
            encode_topics(&repo.topics),
            repo.archived,
            repo.open_issues,
            repo.created_at,
            repo.repo_pushed_at,
            repo.repo_updated_at,
            repo.owner_login,
            repo.owner_avatar_url,
            repo.owner_type,
            repo.license_spdx_id,
            repo.license_name,
            first_fetched_at,
            now,
            repo.not_seen_since_counter,
            repo.get_repo_api_last_modified_header,
        ],
    )
    .into_app_err_with(|| format!("upserting repo {}", repo.id))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{ApiOwner, ApiRepo};
    use camino::Utf8Path;

    fn sample(id: i64, full_name: &str, stars: i64) -> ApiRepo {
        ApiRepo {
            id,
            name: full_name.split('/').next_back().unwrap().to_owned(),
            full_name: full_name.to_owned(),
            html_url: format!("https://github.com/{full_name}"),
            homepage: None,
            description: None,
            language: Some("Rust".to_owned()),
            stargazers_count: stars,
            topics: vec!["cli".to_owned(), "tooling".to_owned()],
            open_issues_count: 0,
            archived: false,
            created_at: Utc::now(),
            pushed_at: Utc::now(),
            updated_at: Utc::now(),
            owner: ApiOwner { login: "octocat".to_owned(), avatar_url: "https://example.com/a.png".to_owned(), kind: "User".to_owned() },
            license: None,
        }
    }

    #[tokio::test]
    async fn save_then_refresh_preserves_first_fetched_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();
        let store = Store::open(&path).await.unwrap();

        let t0 = Utc::now();
        store.save_items(vec![sample(1, "acme/widget", 10)], t0).await.unwrap();

        let t1 = t0 + chrono::Duration::hours(1);
        store.refresh_from_lookup(1, sample(999, "acme/widget", 20), Some("etag-1".to_owned()), t1).await.unwrap();

        let rows = store.likely_deleted(10).await.unwrap();
        assert!(rows.is_empty(), "fresh refresh should not appear in the likely-deleted set");
    }

    #[tokio::test]
    async fn renamed_repo_deletes_the_old_full_name_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();
        let store = Store::open(&path).await.unwrap();

        let now = Utc::now();
        store.save_items(vec![sample(1, "acme/widget", 10)], now).await.unwrap();
        // A new repo takes over the old name under a different Id.
        store.save_items(vec![sample(2, "acme/widget", 1)], now).await.unwrap();

        let count: i64 = store
            .with_connection(|conn| conn.query_row("SELECT count(*) FROM Repo WHERE FullName = 'acme/widget'", [], |r| r.get(0)).into_app_err("counting"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn likely_deleted_orders_by_counter_then_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();
        let store = Store::open(&path).await.unwrap();

        let now = Utc::now();
        store.save_items(vec![sample(1, "a/a", 10), sample(2, "b/b", 10), sample(3, "c/c", 10)], now).await.unwrap();
        store
            .with_connection(|conn| {
                conn.execute_batch(
                    "UPDATE Repo SET NotSeenSinceCounter = 5 WHERE Id = 1;
                     UPDATE Repo SET NotSeenSinceCounter = 7 WHERE Id = 2;
                     UPDATE Repo SET NotSeenSinceCounter = 7 WHERE Id = 3;",
                )
                .into_app_err("seeding counters")
            })
            .await
            .unwrap();

        let rows = store.likely_deleted(10).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn cycle_increment_bumps_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();
        let store = Store::open(&path).await.unwrap();

        store.save_items(vec![sample(1, "a/a", 10), sample(2, "b/b", 20)], Utc::now()).await.unwrap();
        store.increment_not_seen_counters().await.unwrap();
        store.increment_not_seen_counters().await.unwrap();

        let rows = store.likely_deleted(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.not_seen_since_counter == 2));
    }
}
