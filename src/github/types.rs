//! The repository JSON shape shared by GitHub's search and single-repo
//! lookup endpoints. Field names follow the GitHub REST API exactly, ported
//! from `original_source/fetcher/model.go`'s `Repo` struct.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiOwner {
    pub login: String,
    pub avatar_url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiLicense {
    pub spdx_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRepo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub stargazers_count: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub open_issues_count: i64,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub pushed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: ApiOwner,
    #[serde(default)]
    pub license: Option<ApiLicense>,
}

/// A page of search results.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub total_count: i64,
    pub items: Vec<ApiRepo>,
    #[serde(default)]
    pub incomplete_results: bool,
}
