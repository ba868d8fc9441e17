//! GitHub App authentication, search, and single-repository lookup clients.

pub mod auth;
pub mod client;
pub mod lookup;
pub mod search;
pub mod types;

pub use auth::AppAuth;
pub use client::{Client, GithubApiResult, RateLimitInfo};
pub use lookup::{LookupClient, LookupOutcome};
pub use search::{SearchClient, SearchResponse};
pub use types::ApiRepo;
