//! Fetcher Loop: the top-level control loop tying the Window Controller,
//! Search Client, Page Fan-Out, State Store, and Deletion Sweeper together.
//!
//! Grounded on `original_source/fetcher/searcher.go`'s `doFetcherTask` (one
//! iteration's shape) and the outer loop implied by `main.go`'s repeated
//! calls into it, plus `deleted_repositories.go` for the once-per-iteration
//! sweep placement.

use crate::config::Config;
use crate::fanout::{self, PageResult};
use crate::github::{AppAuth, Client, LookupClient, SearchClient, SearchResponse};
use crate::shutdown::{sleep_cancellable, Shutdown};
use crate::store::Store;
use crate::sweeper;
use crate::window::{self, CreationDateRange, ProgressionOutcome};
use chrono::{DateTime, Utc};
use ohno::IntoAppError;
use std::sync::Arc;
use std::time::Duration;

const ITERATION_FAILURE_BACKOFF: Duration = Duration::from_secs(15);
const GITHUB_API_BASE_URL: &str = "https://api.github.com";

/// Runs the crawl: repeats iterations (one first-page search, its fan-out,
/// and one deletion-sweep pass) until `max_stars` falls below
/// `config.minimum_stars`, at which point it resets state for the next
/// cycle and returns.
pub async fn run(config: Config) -> crate::Result<()> {
    let store = Store::open(&config.database).await?;
    let auth = Arc::new(AppAuth::new(config.github_app_id.clone(), config.github_installation_id.clone(), &config.github_private_key_path)?);
    let http = reqwest::Client::builder().user_agent("star-crawler").build().into_app_err("building GitHub HTTP client")?;
    let mut client = Client::new(http, GITHUB_API_BASE_URL);
    if config.enable_request_log {
        client = client.with_request_log(crate::logging::open_request_log()?);
    }
    if config.enable_response_log {
        client = client.with_response_log(crate::logging::open_response_log()?);
    }
    if config.enable_sql_log {
        store.enable_sql_log(crate::logging::open_sql_log()?).await?;
    }
    let search = SearchClient::new(client.clone(), Arc::clone(&auth));
    let lookup = LookupClient::new(client, auth);

    let (shutdown_tx, mut shutdown) = Shutdown::new();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!(target: "fetcher", "shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }));

    loop {
        if shutdown.is_requested() {
            log::info!(target: "fetcher", "shutdown requested, exiting");
            return Ok(());
        }

        let max_stars = store.get_max_stars().await?;
        if max_stars < config.minimum_stars {
            log::info!(target: "fetcher", "max_stars ({max_stars}) fell below the floor ({}); cycle complete", config.minimum_stars);
            let now = Utc::now();
            store.set_max_stars(window::DEFAULT_MAX_STARS, now).await?;
            store.set_search_window(window::DEFAULT_SEARCH_WINDOW).await?;
            store.increment_not_seen_counters().await?;
            return Ok(());
        }

        if let Err(e) = run_iteration(&store, &search, max_stars, &mut shutdown).await {
            log::error!(target: "fetcher", "iteration failed: {e:#}");
            if sleep_cancellable(&mut shutdown, ITERATION_FAILURE_BACKOFF).await.is_err() {
                return Ok(());
            }
            continue;
        }

        if let Err(e) = sweeper::sweep(&store, &lookup, Utc::now()).await {
            log::error!(target: "fetcher", "deletion sweep failed: {e:#}");
        }
    }
}

/// Runs one iteration: either the unbounded top-of-the-top sweep, or a
/// bounded `[minStars, maxStars]` first-page fetch, its fan-out, and the
/// resulting window-state mutation.
async fn run_iteration(store: &Store, search: &SearchClient, max_stars: i64, shutdown: &mut Shutdown) -> crate::Result<()> {
    if window::is_top_of_top(max_stars) {
        return run_top_of_top_sweep(store, search, max_stars, shutdown).await;
    }

    let now = Utc::now();
    let search_window = store.get_search_window().await?;
    let date_range = store.get_creation_date_range(now).await?;

    // Repair out-of-bounds window state before issuing a query — the
    // "searchWindow ∈ [0, maxStars)" invariant.
    if date_range.days_window < 0 {
        log::warn!(target: "fetcher", "days_window went negative ({}), resetting to 1", date_range.days_window);
        return store.save_creation_date_range(CreationDateRange::new(date_range.day_start, 1)).await;
    }
    if search_window < 0 {
        log::warn!(target: "fetcher", "search_window went negative ({search_window}), resetting to 1");
        return store.set_search_window(1).await;
    }
    if search_window >= max_stars {
        log::warn!(target: "fetcher", "search_window ({search_window}) grew past max_stars ({max_stars}), capping");
        return store.set_search_window(max_stars - 1).await;
    }

    let min_stars = max_stars - search_window;
    let query = window::build_query(Some(min_stars), max_stars, &date_range, now);

    let first_page = search.search(1, &query).await?;
    first_page.wait_if_necessary(shutdown).await?;

    if first_page.incomplete_results {
        log::warn!(target: "fetcher", "search response for '{query}' reports incomplete_results");
    }

    let covers_everything = date_range.covers_everything(now);
    let covers_today = date_range.covers_today(now);

    let sizing = window::decide_sizing(first_page.total_count, search_window, date_range.days_window, covers_everything, covers_today)?;
    if sizing.aborts_iteration() {
        let (new_search_window, new_days_window) = window::apply_sizing(sizing, search_window, date_range.days_window)?;
        store.set_search_window(new_search_window).await?;
        store.save_creation_date_range(CreationDateRange::new(date_range.day_start, new_days_window)).await?;
        log::info!(target: "fetcher", "total_count={} can't be narrowed further this iteration; shrinking and retrying", first_page.total_count);
        return Ok(());
    }

    store.save_items(first_page.items.clone(), now).await?;

    let total_pages = window::page_count(first_page.total_count);
    let rate_limit_remaining = first_page.rate_limit.map_or(i64::MAX, |rl| rl.remaining);

    let mut pages = vec![PageResult { page: 1, response: Ok(first_page) }];
    if total_pages > 1 {
        pages.extend(fanout::fetch_remaining_pages(search, &query, total_pages, rate_limit_remaining, shutdown).await);
    }
    pages.sort_by_key(|p| p.page);

    let mut saw_failure = false;
    for page in &pages {
        match &page.response {
            Ok(response) if page.page > 1 => store.save_items(response.items.clone(), now).await?,
            Ok(_) => {}
            Err(e) => {
                log::warn!(target: "fetcher", "page {} failed for query '{query}': {e:#}", page.page);
                saw_failure = true;
            }
        }
    }

    let date_advanced = apply_progression(store, &pages, total_pages, covers_today, max_stars, now).await?;

    let (sized_search_window, sized_days_window) = window::apply_sizing(sizing, search_window, date_range.days_window)?;
    if sized_search_window != search_window {
        store.set_search_window(sized_search_window).await?;
    }
    if date_advanced || sized_days_window != date_range.days_window {
        let day_start = if date_advanced { date_range.next().day_start } else { date_range.day_start };
        store.save_creation_date_range(CreationDateRange::new(day_start, sized_days_window)).await?;
    }

    if saw_failure {
        ohno::bail!("one or more pages failed during fan-out for query '{query}'; window only partially advanced, will retry");
    }

    Ok(())
}

/// Walks every successfully-fetched page in order, applying its
/// progression decision. Returns whether the date slice should advance —
/// deferred rather than applied immediately, so it can be composed with a
/// same-iteration window-size change instead of one clobbering the other.
async fn apply_progression(store: &Store, pages: &[PageResult], total_pages: i64, covers_today: bool, max_stars: i64, now: DateTime<Utc>) -> crate::Result<bool> {
    let mut current_max_stars = max_stars;
    let mut date_advanced = false;

    for page in pages {
        let Ok(response) = &page.response else { continue };
        let is_last_page_processed = page.page == total_pages && !response.incomplete_results;
        let outcome = window::decide_progression(response.total_count, is_last_page_processed, covers_today, response.min_stargazers());

        match outcome {
            ProgressionOutcome::DecrementMaxStars => {
                current_max_stars -= 1;
                store.set_max_stars(current_max_stars, now).await?;
            }
            ProgressionOutcome::AdvanceDateSlice => date_advanced = true,
            ProgressionOutcome::SetMaxStarsBeyondMinimum { min_stars_on_page } => {
                current_max_stars = min_stars_on_page - 1;
                store.set_max_stars(current_max_stars, now).await?;
            }
            ProgressionOutcome::SetMaxStarsToMinimum { min_stars_on_page } => {
                // Mirrors decreaseMaxStarsToMinumum's `leastStargazers < maxStars`
                // guard: fan-out pages race against page 1, so a later page can
                // legitimately report a higher minimum than an earlier one already
                // wrote. max_stars must never go up outside the termination reset.
                if min_stars_on_page < current_max_stars {
                    current_max_stars = min_stars_on_page;
                    store.set_max_stars(current_max_stars, now).await?;
                }
            }
        }
    }

    Ok(date_advanced)
}

/// The unbounded `stars:>200000` sweep performed before resuming the
/// bounded walk one star lower. Fetched sequentially, page by page,
/// exactly as the bounded-window first page is — there is no fan-out here
/// because the server-side 10-page cap makes this a small, fixed-size scan.
async fn run_top_of_top_sweep(store: &Store, search: &SearchClient, max_stars: i64, shutdown: &mut Shutdown) -> crate::Result<()> {
    log::info!(target: "fetcher", "switching to the unbounded top-of-the-top sweep (stars:>{max_stars})");
    let query = window::stars_fragment(None, max_stars);

    let first_page = search.search(1, &query).await?;
    first_page.wait_if_necessary(shutdown).await?;

    if first_page.total_count > window::MAX_RESULTS_PER_PAGE * window::MAX_PAGES {
        ohno::bail!(
            "top-of-the-top sweep for stars:>{max_stars} spans more than {} pages (total_count={}); the repository count above this threshold must be raised",
            window::MAX_PAGES,
            first_page.total_count
        );
    }

    let total_pages = window::page_count(first_page.total_count);
    store.save_items(first_page.items, Utc::now()).await?;

    for page in 2..=total_pages {
        let response: SearchResponse = search.search(page, &query).await?;
        response.wait_if_necessary(shutdown).await?;
        store.save_items(response.items, Utc::now()).await?;
    }

    store.set_max_stars(max_stars - 1, Utc::now()).await
}
