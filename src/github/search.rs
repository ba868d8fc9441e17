//! The search client: one query against the search endpoint, decoded into a
//! [`SearchResponse`] carrying results, rate-limit state, and the page
//! index. Grounded on `original_source/fetcher/searcher.go`'s `search()` and
//! `GithubSearchResponse.WaitIfNeccessary`.

use crate::github::client::{Client, GithubApiResult, RateLimitInfo};
use crate::github::types::SearchPage;
use crate::github::ApiRepo;
use crate::github::AppAuth;
use crate::shutdown::{sleep_cancellable, Shutdown};
use crate::window::MAX_RESULTS_PER_PAGE;
use chrono::Utc;
use ohno::IntoAppError;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Clock-drift pad added on top of the reported rate-limit reset time.
const RATE_LIMIT_SLEEP_PAD: chrono::Duration = chrono::Duration::seconds(4);
/// Fallback sleep when the computed wait would be negative.
const RATE_LIMIT_FALLBACK_SLEEP: StdDuration = StdDuration::from_secs(20);

/// A decoded, page-tagged search result.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub total_count: i64,
    pub items: Vec<ApiRepo>,
    pub incomplete_results: bool,
    pub rate_limit: Option<RateLimitInfo>,
    pub page: i64,
}

impl SearchResponse {
    /// The lowest star count among this page's items, if any.
    #[must_use]
    pub fn min_stargazers(&self) -> Option<i64> {
        self.items.iter().map(|item| item.stargazers_count).min()
    }

    /// Sleeps until the rate-limit window resets, padded by
    /// [`RATE_LIMIT_SLEEP_PAD`], or the [`RATE_LIMIT_FALLBACK_SLEEP`] if the
    /// computed wait would be negative. Cancellation-aware.
    pub async fn wait_if_necessary(&self, shutdown: &mut Shutdown) -> crate::Result<()> {
        wait_on_rate_limit(self.rate_limit, shutdown).await
    }
}

async fn wait_on_rate_limit(rate_limit: Option<RateLimitInfo>, shutdown: &mut Shutdown) -> crate::Result<()> {
    let Some(rate_limit) = rate_limit else { return Ok(()) };
    if rate_limit.remaining > 0 {
        return Ok(());
    }

    let until = rate_limit.reset_at + RATE_LIMIT_SLEEP_PAD - Utc::now();
    let sleep_for = match until.to_std() {
        Ok(duration) => {
            log::info!(target: "search", "rate limit exhausted, sleeping for {duration:?}");
            duration
        }
        Err(_) => {
            log::info!(target: "search", "rate limit reset computed in the past, sleeping {RATE_LIMIT_FALLBACK_SLEEP:?} instead");
            RATE_LIMIT_FALLBACK_SLEEP
        }
    };

    sleep_cancellable(shutdown, sleep_for).await.map_err(|_| ohno::app_err!("cancelled while waiting for search rate limit to reset"))
}

/// Issues search queries against `…/search/repositories`, minting
/// authentication via [`AppAuth`] and classifying responses through
/// [`Client`].
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    auth: Arc<AppAuth>,
}

impl SearchClient {
    #[must_use]
    pub fn new(client: Client, auth: Arc<AppAuth>) -> Self {
        Self { client, auth }
    }

    /// Issues one search query for `page`. Expects success (200); any other
    /// status is a hard failure of this call — rate-limit pacing is the
    /// caller's responsibility via [`SearchResponse::wait_if_necessary`],
    /// called only on a successful response, exactly as the original calls
    /// `WaitIfNeccessary` only after a 200.
    pub async fn search(&self, page: i64, query: &str) -> crate::Result<SearchResponse> {
        let url = format!(
            "{}/search/repositories?q={}&sort=stars&per_page={MAX_RESULTS_PER_PAGE}&page={page}",
            self.client.base_url(),
            urlencode(query),
        );

        log::debug!(target: "search", "searching with query '{query}' — page {page}");

        let token = self.auth.token().await?;
        match self.client.api_call(&url, &token).await {
            GithubApiResult::Success(resp, rate_limit) => {
                let body: SearchPage = resp.json().await.into_app_err_with(|| format!("decoding search response for page {page}"))?;
                Ok(SearchResponse {
                    total_count: body.total_count,
                    items: body.items,
                    incomplete_results: body.incomplete_results,
                    rate_limit,
                    page,
                })
            }
            GithubApiResult::RateLimited(_) => {
                Err(ohno::app_err!("search request for query '{query}', page {page} was rate-limited after retries"))
            }
            GithubApiResult::NotFound(_) => {
                Err(ohno::app_err!("search endpoint returned not-found for query '{query}' — this should never happen"))
            }
            GithubApiResult::Failed(error, _) => Err(ohno::app_err!("search request failed for query '{query}', page {page}: {error}")),
        }
    }
}

fn urlencode(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, percent_encoding::NON_ALPHANUMERIC).to_string()
}
