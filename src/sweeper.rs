//! Deletion Sweeper: probes the repositories most likely to have vanished
//! from GitHub and prunes or refreshes them accordingly.
//!
//! Grounded on `original_source/fetcher/deleted_repositories.go`'s
//! `checkReposForDeletion`/`getRepo` — the candidate cap, the rate-limit
//! skip check, and the post-sweep reconciliation ("latest reset wins, min
//! remaining on tie") are all ported from there. The `403 | 404 | 451 →
//! gone` classification itself lives in [`crate::github::LookupClient`],
//! which this module treats as an opaque collaborator.

use crate::github::{LookupClient, LookupOutcome, RateLimitInfo};
use crate::store::Store;
use chrono::{DateTime, Utc};

/// Upper bound on repositories probed in one sweep, regardless of quota.
const CANDIDATE_CAP: i64 = 50;

/// How much slack is given to a stored reset time before it's considered
/// stale. Ported from the original's `-3*time.Second` accuracy margin.
const RATELIMIT_ACCURACY_PAD: chrono::Duration = chrono::Duration::seconds(3);

/// Runs one deletion-sweep pass: selects likely-deleted candidates,
/// conditionally-fetches each from the lookup endpoint, and applies the
/// resulting delete/refresh/unchanged/skip outcome.
pub async fn sweep(store: &Store, lookup: &LookupClient, now: DateTime<Utc>) -> crate::Result<()> {
    let (reset, remaining) = store.get_repo_ratelimit(now).await?;
    let ratelimit_still_accurate = reset + RATELIMIT_ACCURACY_PAD > now;

    if ratelimit_still_accurate && remaining <= 0 {
        log::info!(target: "sweeper", "skipping deletion sweep: out of lookup quota until {reset}");
        return Ok(());
    }

    let candidate_cap = if ratelimit_still_accurate { CANDIDATE_CAP.min(remaining) } else { CANDIDATE_CAP };
    if candidate_cap <= 0 {
        return Ok(());
    }

    let candidates = store.likely_deleted(candidate_cap).await?;
    if candidates.is_empty() {
        return Ok(());
    }

    log::info!(target: "sweeper", "probing {} likely-deleted repositories (cap {candidate_cap})", candidates.len());

    let probes = candidates.iter().map(|repo| async move {
        let outcome = lookup.lookup(&repo.full_name, repo.get_repo_api_last_modified_header.as_deref()).await;
        (repo, outcome)
    });
    let probed = futures::future::join_all(probes).await;

    let mut deleted = 0;
    let mut not_modified = 0;
    let mut updated = 0;
    let mut observed_rate_limits = Vec::new();

    for (repo, probe) in probed {
        let (outcome, rate_limit) = match probe {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!(target: "sweeper", "failed probing '{}': {e:#}", repo.full_name);
                continue;
            }
        };
        observed_rate_limits.extend(rate_limit);

        match outcome {
            LookupOutcome::Gone => {
                store.delete(repo.id).await?;
                deleted += 1;
            }
            LookupOutcome::NotModified { last_modified } => {
                store.mark_unchanged(repo.id, last_modified, now).await?;
                not_modified += 1;
            }
            LookupOutcome::Exists { item, last_modified } => {
                store.refresh_from_lookup(repo.id, item, last_modified, now).await?;
                updated += 1;
            }
            LookupOutcome::Transient => {
                log::debug!(target: "sweeper", "transient lookup failure for '{}', leaving untouched", repo.full_name);
            }
        }
    }

    if let Some((reset, remaining)) = reconcile_rate_limits(&observed_rate_limits) {
        store.set_repo_ratelimit(reset, remaining).await?;
    }

    log::info!(target: "sweeper", "sweep complete: deleted {deleted}, updated {updated}, unchanged {not_modified}");
    Ok(())
}

/// Reduces a batch of observed rate-limit readings to one: the reading
/// with the latest reset time wins; ties break on the lower remaining
/// count, matching the original's reconciliation after its parallel probe.
fn reconcile_rate_limits(observed: &[RateLimitInfo]) -> Option<(DateTime<Utc>, i64)> {
    observed.iter().fold(None, |acc, rl| match acc {
        None => Some((rl.reset_at, rl.remaining)),
        Some((reset, remaining)) if rl.reset_at > reset => Some((rl.reset_at, rl.remaining)),
        Some((reset, remaining)) if rl.reset_at == reset => Some((reset, remaining.min(rl.remaining))),
        same => same,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{AppAuth, Client};
    use camino::Utf8Path;
    use std::sync::Arc;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(&dir.path().join("repos.db")).unwrap().to_owned();
        let store = Store::open(&path).await.unwrap();
        (dir, store)
    }

    fn sample(id: i64, full_name: &str, counter: i64) -> (crate::github::ApiRepo, i64) {
        (
            crate::github::ApiRepo {
                id,
                name: full_name.split('/').next_back().unwrap().to_owned(),
                full_name: full_name.to_owned(),
                html_url: format!("https://github.com/{full_name}"),
                homepage: None,
                description: None,
                language: None,
                stargazers_count: 5,
                topics: vec![],
                open_issues_count: 0,
                archived: false,
                created_at: Utc::now(),
                pushed_at: Utc::now(),
                updated_at: Utc::now(),
                owner: crate::github::types::ApiOwner { login: "acme".to_owned(), avatar_url: "https://example.com/a.png".to_owned(), kind: "Organization".to_owned() },
                license: None,
            },
            counter,
        )
    }

    #[tokio::test]
    async fn skips_entirely_when_quota_exhausted_and_reset_in_future() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        store.set_repo_ratelimit(now + chrono::Duration::minutes(5), 0).await.unwrap();

        let (item, _) = sample(1, "acme/widget", 5);
        store.save_items(vec![item], now).await.unwrap();
        for _ in 0..4 {
            store.increment_not_seen_counters().await.unwrap();
        }

        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).expect(0).mount(&server).await;
        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, Arc::new(AppAuth::new_for_tests("t")));

        sweep(&store, &lookup, now).await.unwrap();
    }

    #[tokio::test]
    async fn gone_candidates_are_deleted_and_rest_are_untouched() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();

        let (gone, _) = sample(1, "acme/gone", 5);
        let (alive, _) = sample(2, "acme/alive", 5);
        store.save_items(vec![gone, alive], now).await.unwrap();
        for _ in 0..4 {
            store.increment_not_seen_counters().await.unwrap();
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/repos/acme/gone$"))
            .respond_with(ResponseTemplate::new(404).insert_header("x-ratelimit-remaining", "100").insert_header("x-ratelimit-reset", "9999999999"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/repos/acme/alive$"))
            .respond_with(
                ResponseTemplate::new(304)
                    .insert_header("Last-Modified", "Wed, 03 Jan 2024 00:00:00 GMT")
                    .insert_header("x-ratelimit-remaining", "99")
                    .insert_header("x-ratelimit-reset", "9999999999"),
            )
            .mount(&server)
            .await;

        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, Arc::new(AppAuth::new_for_tests("t")));

        sweep(&store, &lookup, now).await.unwrap();

        let remaining_rows = store.likely_deleted(10).await.unwrap();
        assert!(remaining_rows.is_empty(), "the surviving repo's counter should have been reset to 0 by the 304 outcome");

        let (reset, remaining) = store.get_repo_ratelimit(now).await.unwrap();
        assert_eq!(remaining, 99, "reconciliation should keep the later/tied-minimum reading");
        assert!(reset.timestamp() > now.timestamp());
    }

    #[test]
    fn reconcile_prefers_the_latest_reset() {
        let earlier = RateLimitInfo { remaining: 50, reset_at: Utc::now() };
        let later = RateLimitInfo { remaining: 10, reset_at: Utc::now() + chrono::Duration::minutes(1) };
        let (reset, remaining) = reconcile_rate_limits(&[earlier, later]).unwrap();
        assert_eq!(reset, later.reset_at);
        assert_eq!(remaining, 10);
    }

    #[test]
    fn reconcile_takes_the_minimum_remaining_on_a_tie() {
        let reset_at = Utc::now();
        let a = RateLimitInfo { remaining: 30, reset_at };
        let b = RateLimitInfo { remaining: 5, reset_at };
        let (reset, remaining) = reconcile_rate_limits(&[a, b]).unwrap();
        assert_eq!(reset, reset_at);
        assert_eq!(remaining, 5);
    }
}
