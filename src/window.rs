//! The Window Controller: pure functions over `(maxStars, searchWindow,
//! creationDateRange)` that decide the next search query and how its result
//! should mutate that state.
//!
//! Grounded on `original_source/fetcher/github_searcher_state.go`
//! (`RepoCreationDateRange` and its `HalvedRange`/`BiggerRange`/`NextRange`/
//! `CoversToday` methods) and `original_source/fetcher/searcher.go` (the
//! trigger table driving `doFetcherTask`). Clock-drift padding on "covers
//! today" is 24 hours, not the source's 1 hour — spec.md is explicit here.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// GitHub's own founding date; the zero point of the creation-date axis.
pub fn founding_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2007, 11, 1, 12, 0, 0).single().expect("valid constant date")
}

pub const DEFAULT_MAX_STARS: i64 = 200_000;
pub const DEFAULT_SEARCH_WINDOW: i64 = 1000;
pub const TOP_SWEEP_THRESHOLD: i64 = 200_000;
pub const RESULT_CAP: i64 = 1000;
pub const MAX_RESULTS_PER_PAGE: i64 = 100;
pub const MAX_PAGES: i64 = 10;

/// "Near the 1000-result cap" shrink trigger threshold (`MAX_PAGES - 2`
/// pages worth of results).
pub const NEAR_CAP_SHRINK_THRESHOLD: i64 = 800;
/// Underuse grow trigger threshold (`4 * per_page`).
pub const GROW_THRESHOLD: i64 = 400;

/// Clock-drift pad applied to every "does this date range cover today"
/// check.
pub const COVERS_TODAY_PAD: Duration = Duration::hours(24);

/// A span on the creation-date axis: `[dayStart, dayStart + daysWindow]`,
/// measured in days since [`founding_epoch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationDateRange {
    pub day_start: i64,
    pub days_window: i64,
}

impl CreationDateRange {
    pub fn new(day_start: i64, days_window: i64) -> Self {
        Self { day_start, days_window }
    }

    /// The default range: from the epoch through two days from now, wide
    /// enough to cover every repository that exists today.
    pub fn default_range(now: DateTime<Utc>) -> Self {
        let about_today = now + Duration::days(2);
        let days_window = (about_today - founding_epoch()).num_days();
        Self { day_start: 0, days_window }
    }

    fn start(&self) -> DateTime<Utc> {
        founding_epoch() + Duration::days(self.day_start)
    }

    fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(self.days_window)
    }

    /// GitHub search qualifier syntax for this range, e.g.
    /// `created:2019-03-01T12:00:00Z..2019-04-01T12:00:00Z`.
    pub fn to_query_fragment(&self) -> String {
        const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
        format!("created:{}..{}", self.start().format(FORMAT), self.end().format(FORMAT))
    }

    /// Whether this range's end, padded by [`COVERS_TODAY_PAD`], is still in
    /// the future relative to `now` — i.e. whether a repository created
    /// today would fall inside it.
    pub fn covers_today(&self, now: DateTime<Utc>) -> bool {
        self.end() > now + COVERS_TODAY_PAD
    }

    /// Whether this range spans from the epoch through today: no date
    /// filter is needed on the query at all.
    pub fn covers_everything(&self, now: DateTime<Utc>) -> bool {
        self.day_start == Self::default_range(now).day_start && self.covers_today(now)
    }

    pub fn halved(&self) -> crate::Result<Self> {
        Ok(Self { day_start: self.day_start, days_window: shrink(self.days_window)? })
    }

    pub fn bigger(&self) -> Self {
        Self { day_start: self.day_start, days_window: grow(self.days_window) }
    }

    /// The next slice to scan once this one has been fully walked down to
    /// the floor.
    pub fn next(&self) -> Self {
        Self { day_start: self.day_start + self.days_window + 1, days_window: self.days_window }
    }
}

/// Shrinks a window value: subtracts 1 when `window <= 2`, otherwise halves
/// (rounded to nearest). Shrinking from 0 is a programmer-invariant
/// violation.
pub fn shrink(window: i64) -> crate::Result<i64> {
    if window <= 0 {
        ohno::bail!("cannot shrink a window that is already at or below zero (window={window})");
    }
    if window <= 2 {
        Ok(window - 1)
    } else {
        Ok((window as f64 * 0.5).round() as i64)
    }
}

/// Grows a window value: adds 1 when `window <= 2`, otherwise multiplies by
/// 1.5 (rounded to nearest).
pub fn grow(window: i64) -> i64 {
    if window <= 2 {
        window + 1
    } else {
        (window as f64 * 1.5).round() as i64
    }
}

/// Whether `max_stars` is high enough that the controller should perform
/// the unbounded "top of the top" sweep (`stars:>200000`) instead of a
/// bounded `[minStars, maxStars]` window.
pub fn is_top_of_top(max_stars: i64) -> bool {
    max_stars >= TOP_SWEEP_THRESHOLD
}

/// Builds the star-count search qualifier: `stars:M..N` for a bounded
/// window, or `stars:>N` for the unbounded top-of-top sweep.
pub fn stars_fragment(min_stars: Option<i64>, max_stars: i64) -> String {
    match min_stars {
        Some(min) => format!("stars:{min}..{max_stars}"),
        None => format!("stars:>{max_stars}"),
    }
}

/// Composes the full search query: the star filter, plus the date filter
/// when the range doesn't already cover everything.
pub fn build_query(min_stars: Option<i64>, max_stars: i64, date_range: &CreationDateRange, now: DateTime<Utc>) -> String {
    let mut query = stars_fragment(min_stars, max_stars);
    if !date_range.covers_everything(now) {
        query.push(' ');
        query.push_str(&date_range.to_query_fragment());
    }
    query
}

/// Outcome of evaluating the overflow/underflow triggers against a search
/// response's `total_count`. Computed once per first-page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingOutcome {
    /// `totalCount > 1000`, `searchWindow > 0`: halve the star window, fetch
    /// no further pages this iteration.
    ShrinkSearchWindow,
    /// `totalCount > 1000`, `searchWindow == 0`, `daysWindow > 0`: halve the
    /// date window, fetch no further pages this iteration.
    ShrinkDaysWindow,
    /// `totalCount > 800`: shrink the star window ahead of hitting the cap,
    /// but still proceed with the fan-out this iteration.
    ShrinkSearchWindowProactive,
    /// `totalCount <= 400` and the range covers everything: widen the star
    /// window.
    GrowSearchWindow,
    /// `totalCount <= 400` and the range does not cover today: widen the
    /// date window.
    GrowDaysWindow,
    /// No window-size adjustment triggered.
    Unchanged,
}

impl SizingOutcome {
    /// Whether this outcome means the iteration stops after this decision,
    /// without fetching page 2 onward or running the progression decision.
    pub fn aborts_iteration(self) -> bool {
        matches!(self, Self::ShrinkSearchWindow | Self::ShrinkDaysWindow)
    }
}

/// Evaluates the overflow/underflow triggers (spec table rows 1–3, 9–11).
/// Fatal narrowing (`totalCount > 1000` with both windows already at 0)
/// returns `Err` and must not be caught by the iteration's retry loop.
pub fn decide_sizing(total_count: i64, search_window: i64, days_window: i64, covers_everything: bool, covers_today: bool) -> crate::Result<SizingOutcome> {
    if total_count > RESULT_CAP {
        if search_window > 0 {
            return Ok(SizingOutcome::ShrinkSearchWindow);
        }
        if days_window > 0 {
            return Ok(SizingOutcome::ShrinkDaysWindow);
        }
        ohno::bail!(
            "cannot narrow the search further: totalCount={total_count} exceeds the {RESULT_CAP}-result cap \
             with both the star window and the date window already at zero"
        );
    }

    if total_count > NEAR_CAP_SHRINK_THRESHOLD && search_window > 0 {
        return Ok(SizingOutcome::ShrinkSearchWindowProactive);
    }

    if total_count <= GROW_THRESHOLD {
        if covers_everything {
            return Ok(SizingOutcome::GrowSearchWindow);
        }
        if !covers_today {
            return Ok(SizingOutcome::GrowDaysWindow);
        }
    }

    Ok(SizingOutcome::Unchanged)
}

/// Applies a [`SizingOutcome`] to the current `(searchWindow, daysWindow)`
/// pair, returning the updated pair.
pub fn apply_sizing(outcome: SizingOutcome, search_window: i64, days_window: i64) -> crate::Result<(i64, i64)> {
    match outcome {
        SizingOutcome::Unchanged => Ok((search_window, days_window)),
        SizingOutcome::ShrinkSearchWindow | SizingOutcome::ShrinkSearchWindowProactive => Ok((shrink(search_window)?, days_window)),
        SizingOutcome::ShrinkDaysWindow => Ok((search_window, shrink(days_window)?)),
        SizingOutcome::GrowSearchWindow => Ok((grow(search_window), days_window)),
        SizingOutcome::GrowDaysWindow => Ok((search_window, grow(days_window))),
    }
}

/// Outcome of evaluating the progression triggers (spec table rows 4–8)
/// for one page's result. Evaluated once per page, in page order — only the
/// highest-numbered page in a fan-out uses the "beyond minimum" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOutcome {
    /// `totalCount == 0`, range covers today: decrement `maxStars` by one.
    DecrementMaxStars,
    /// `totalCount == 0` (range not covering today), or last page processed
    /// with range not covering today: advance to the next date slice.
    AdvanceDateSlice,
    /// Last page processed, range covers today: jump `maxStars` to just
    /// below the lowest star count seen on this page.
    SetMaxStarsBeyondMinimum { min_stars_on_page: i64 },
    /// Not the last page processed: walk `maxStars` down to the lowest star
    /// count seen on this page (inclusive), so the next iteration resumes
    /// from there. `maxStars` is monotone non-increasing, so the caller must
    /// only apply this when `min_stars_on_page` is below the current
    /// `maxStars` — fan-out pages race against page 1 and a later page can
    /// legitimately report a higher minimum than an earlier one already
    /// committed.
    SetMaxStarsToMinimum { min_stars_on_page: i64 },
}

/// Evaluates the progression trigger for a single page's result.
/// `min_stars_on_page` must be `Some` whenever `total_count > 0` — a page
/// with items always has a minimum. Does not itself know the running
/// `maxStars`; the caller applying [`ProgressionOutcome::SetMaxStarsToMinimum`]
/// is responsible for the monotonicity guard.
pub fn decide_progression(total_count: i64, is_last_page_processed: bool, covers_today: bool, min_stars_on_page: Option<i64>) -> ProgressionOutcome {
    if total_count == 0 {
        return if covers_today { ProgressionOutcome::DecrementMaxStars } else { ProgressionOutcome::AdvanceDateSlice };
    }

    let min_stars_on_page = min_stars_on_page.expect("a page with total_count > 0 always has a minimum star count");

    if is_last_page_processed {
        if covers_today {
            ProgressionOutcome::SetMaxStarsBeyondMinimum { min_stars_on_page }
        } else {
            ProgressionOutcome::AdvanceDateSlice
        }
    } else {
        ProgressionOutcome::SetMaxStarsToMinimum { min_stars_on_page }
    }
}

/// The number of result pages a search response spans, capped at
/// [`MAX_PAGES`] by the server regardless of `total_count`.
pub fn page_count(total_count: i64) -> i64 {
    total_count.div_ceil(MAX_RESULTS_PER_PAGE).min(MAX_PAGES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        founding_epoch() + Duration::days(6800)
    }

    #[test]
    fn shrink_halves_large_windows_and_decrements_small_ones() {
        assert_eq!(shrink(1000).unwrap(), 500);
        assert_eq!(shrink(3).unwrap(), 2);
        assert_eq!(shrink(2).unwrap(), 1);
        assert_eq!(shrink(1).unwrap(), 0);
        assert!(shrink(0).is_err());
    }

    #[test]
    fn grow_grows_large_windows_and_increments_small_ones() {
        assert_eq!(grow(1000), 1500);
        assert_eq!(grow(2), 3);
        assert_eq!(grow(0), 1);
    }

    #[test]
    fn shrink_then_grow_never_exceeds_original_for_large_windows() {
        for w in [4, 10, 100, 1000, 10_000] {
            assert!(grow(shrink(w).unwrap()) <= w);
        }
    }

    #[test]
    fn creation_date_range_round_trips_through_next() {
        let range = CreationDateRange::new(100, 50);
        let next = range.next();
        assert_eq!(next.day_start, 151);
        assert_eq!(next.days_window, 50);
    }

    #[test]
    fn covers_today_respects_the_24_hour_pad() {
        let now = now();
        let just_inside_pad = CreationDateRange {
            day_start: (now - founding_epoch()).num_days() - 10,
            days_window: 10,
        };
        assert!(!just_inside_pad.covers_today(now), "ends exactly at now, inside the 24h pad, should not count as covering today");

        let comfortably_future = CreationDateRange {
            day_start: (now - founding_epoch()).num_days(),
            days_window: 5,
        };
        assert!(comfortably_future.covers_today(now));
    }

    #[test]
    fn default_range_covers_everything() {
        let now = now();
        assert!(CreationDateRange::default_range(now).covers_everything(now));
    }

    #[test]
    fn sizing_overflow_shrinks_search_window_first() {
        let outcome = decide_sizing(1500, 1000, 30, false, true).unwrap();
        assert_eq!(outcome, SizingOutcome::ShrinkSearchWindow);
        assert!(outcome.aborts_iteration());
    }

    #[test]
    fn sizing_overflow_with_zero_search_window_shrinks_days() {
        let outcome = decide_sizing(1500, 0, 30, false, true).unwrap();
        assert_eq!(outcome, SizingOutcome::ShrinkDaysWindow);
    }

    #[test]
    fn sizing_overflow_with_both_windows_zero_is_fatal() {
        assert!(decide_sizing(1500, 0, 0, false, true).is_err());
    }

    #[test]
    fn sizing_near_cap_shrinks_proactively_without_aborting() {
        let outcome = decide_sizing(900, 1000, 30, false, true).unwrap();
        assert_eq!(outcome, SizingOutcome::ShrinkSearchWindowProactive);
        assert!(!outcome.aborts_iteration());
    }

    #[test]
    fn sizing_underuse_grows_search_window_when_covering_everything() {
        let outcome = decide_sizing(200, 1000, 30, true, true).unwrap();
        assert_eq!(outcome, SizingOutcome::GrowSearchWindow);
    }

    #[test]
    fn sizing_underuse_grows_days_window_when_not_covering_today() {
        let outcome = decide_sizing(200, 1000, 30, false, false).unwrap();
        assert_eq!(outcome, SizingOutcome::GrowDaysWindow);
    }

    #[test]
    fn progression_empty_page_covering_today_decrements_max_stars() {
        assert_eq!(decide_progression(0, true, true, None), ProgressionOutcome::DecrementMaxStars);
    }

    #[test]
    fn progression_empty_page_not_covering_today_advances_slice() {
        assert_eq!(decide_progression(0, true, false, None), ProgressionOutcome::AdvanceDateSlice);
    }

    #[test]
    fn progression_last_page_covering_today_goes_beyond_minimum() {
        assert_eq!(
            decide_progression(250, true, true, Some(42)),
            ProgressionOutcome::SetMaxStarsBeyondMinimum { min_stars_on_page: 42 }
        );
    }

    #[test]
    fn progression_non_last_page_walks_to_minimum() {
        assert_eq!(
            decide_progression(250, false, true, Some(42)),
            ProgressionOutcome::SetMaxStarsToMinimum { min_stars_on_page: 42 }
        );
    }

    #[test]
    fn page_count_is_capped_at_ten() {
        assert_eq!(page_count(250), 3);
        assert_eq!(page_count(1000), 10);
        assert_eq!(page_count(50_000), MAX_PAGES);
    }

    #[test]
    fn is_top_of_top_triggers_at_threshold() {
        assert!(!is_top_of_top(199_999));
        assert!(is_top_of_top(200_000));
    }
}
