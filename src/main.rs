//! Crawls GitHub's search API for every public repository at or above a star
//! threshold, keeping a local SQLite database fresh with a rotating sweep.
//!
//! # Overview
//!
//! `star-crawler` walks the star axis of GitHub's repository search from the
//! top down, slicing the `(star-range, creation-date-range)` search space
//! just finely enough that every query fits under the search API's
//! 1000-result cap, and persists every repository it finds. Once the
//! configured minimum-stars floor is reached, the crawl cycle restarts from
//! the top and a deletion sweep prunes repositories that have disappeared.
//!
//! # Configuration
//!
//! See [`star_crawler::Config`] for the full set of command-line flags and
//! environment variables.

use clap::Parser;
use star_crawler::Config;

#[tokio::main]
async fn main() -> Result<(), ohno::AppError> {
    let config = Config::parse();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    star_crawler::run(config).await
}
