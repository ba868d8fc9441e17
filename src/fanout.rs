//! Page Fan-Out: after the synchronous first-page fetch reveals how many
//! pages a query spans, pages 2..N are fetched concurrently, bounded by the
//! remaining rate-limit budget.
//!
//! Grounded on `original_source/fetcher/searcher.go`'s `doFetcherTask`
//! (the `firstBatchSize`/`maybeResponsesBeforeRatelimit` dance) and on the
//! fan-out/collect shape of
//! `hosting::provider::Provider::get_hosting_data`.

use crate::github::SearchClient;
use crate::shutdown::Shutdown;
use crate::Result;

/// One page's fan-out outcome, tagged with its page number so callers can
/// apply the page-order persistence and `maxStars` rules even though pages
/// complete out of order.
pub struct PageResult {
    pub page: i64,
    pub response: Result<crate::github::SearchResponse>,
}

/// Fetches pages `2..=total_pages` for `query`, honoring `rate_limit_remaining`:
///
/// - If there's enough quota for every remaining page, all are launched in
///   one batch.
/// - Otherwise, the first `rate_limit_remaining` pages are launched and
///   drained first — each successful response is given the chance to sleep
///   out its own rate-limit window before the second batch begins — then
///   the rest follow in a second batch.
///
/// Results are returned in page order regardless of completion order.
pub async fn fetch_remaining_pages(search: &SearchClient, query: &str, total_pages: i64, rate_limit_remaining: i64, shutdown: &mut Shutdown) -> Vec<PageResult> {
    let pages_left = total_pages - 1;
    if pages_left <= 0 {
        return Vec::new();
    }

    let first_batch_size = if rate_limit_remaining >= pages_left { pages_left } else { rate_limit_remaining.max(0).min(pages_left) };

    let first_batch: Vec<i64> = (2..2 + first_batch_size).collect();
    let mut results = fetch_batch(search, query, &first_batch).await;

    if first_batch_size < pages_left {
        for result in &results {
            if let Ok(response) = &result.response
                && response.wait_if_necessary(shutdown).await.is_err()
            {
                log::warn!(target: "fanout", "cancelled while pacing between fan-out batches");
                return results;
            }
        }

        let second_batch: Vec<i64> = (2 + first_batch_size..=total_pages).collect();
        results.extend(fetch_batch(search, query, &second_batch).await);
    }

    results.sort_by_key(|r| r.page);
    results
}

async fn fetch_batch(search: &SearchClient, query: &str, pages: &[i64]) -> Vec<PageResult> {
    let futures = pages.iter().map(|&page| async move {
        let response = search.search(page, query).await;
        PageResult { page, response }
    });
    futures::future::join_all(futures).await
}
