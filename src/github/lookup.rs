//! The single-repository lookup client: a conditional-fetch probe used by
//! the Deletion Sweeper. Grounded on
//! `original_source/fetcher/deleted_repositories.go`'s `getRepo()` — in
//! particular, its three-way status classification is kept separate from
//! the search endpoint's classification in [`crate::github::client::Client`],
//! because the lookup endpoint treats a bare `403` as "this repository is
//! gone" rather than "rate limited".

use crate::github::client::{extract_rate_limit_from_headers, Client, RateLimitInfo};
use crate::github::types::ApiRepo;
use crate::github::AppAuth;
use ohno::IntoAppError;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use std::sync::Arc;

/// Outcome of probing one repository's lookup endpoint.
#[derive(Debug)]
pub enum LookupOutcome {
    /// 200 — the repository exists; body decoded, new `Last-Modified`
    /// captured.
    Exists { item: ApiRepo, last_modified: Option<String> },
    /// 304 — unchanged since the stored `Last-Modified` value.
    NotModified { last_modified: Option<String> },
    /// 404, 403, or 451 — the repository is surely gone.
    Gone,
    /// Any other status, or a request-level failure: indeterminate, retry
    /// next cycle.
    Transient,
}

/// Probes `…/repos/{full_name}` with an optional `If-Modified-Since`.
#[derive(Debug, Clone)]
pub struct LookupClient {
    client: Client,
    auth: Arc<AppAuth>,
}

impl LookupClient {
    #[must_use]
    pub fn new(client: Client, auth: Arc<AppAuth>) -> Self {
        Self { client, auth }
    }

    /// Issues the conditional GET and classifies the response. Returns the
    /// outcome alongside any rate-limit info observed — `None` when the
    /// status was unrecognized, matching the original's refusal to trust
    /// headers on an unexpected response.
    pub async fn lookup(&self, full_name: &str, if_modified_since: Option<&str>) -> crate::Result<(LookupOutcome, Option<RateLimitInfo>)> {
        let url = format!("{}/repos/{full_name}", self.client.base_url());
        let token = self.auth.token().await?;

        let mut builder = self.client.http().get(&url).bearer_auth(token);
        if let Some(ims) = if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, ims);
        }
        let request = builder.build().into_app_err_with(|| format!("building lookup request for '{full_name}'"))?;

        let resp = match crate::resilient_http::resilient_get_request(self.client.http(), request).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!(target: "lookup", "could not fetch '{full_name}' from github: {e:#}");
                return Ok((LookupOutcome::Transient, None));
            }
        };

        let status = resp.status();
        let last_modified = || resp.headers().get(LAST_MODIFIED).and_then(|v| v.to_str().ok()).map(str::to_owned);

        match status {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
                let rate_limit = extract_rate_limit_from_headers(resp.headers());
                Ok((LookupOutcome::Gone, rate_limit))
            }
            StatusCode::NOT_MODIFIED => {
                let rate_limit = extract_rate_limit_from_headers(resp.headers());
                let last_modified = last_modified();
                Ok((LookupOutcome::NotModified { last_modified }, rate_limit))
            }
            StatusCode::OK => {
                let rate_limit = extract_rate_limit_from_headers(resp.headers());
                let last_modified = last_modified();
                let item: ApiRepo = resp.json().await.into_app_err_with(|| format!("decoding lookup response for '{full_name}'"))?;
                Ok((LookupOutcome::Exists { item, last_modified }, rate_limit))
            }
            other => {
                log::warn!(target: "lookup", "unexpected status {other} looking up '{full_name}'");
                Ok((LookupOutcome::Transient, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth() -> Arc<AppAuth> {
        Arc::new(AppAuth::new_for_tests("fake-token"))
    }

    #[tokio::test]
    async fn not_found_is_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/repos/acme/widget")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, auth());

        let (outcome, _) = lookup.lookup("acme/widget", None).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Gone));
    }

    #[tokio::test]
    async fn forbidden_is_also_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/repos/acme/widget")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, auth());

        let (outcome, _) = lookup.lookup("acme/widget", None).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Gone), "403 must be treated as gone, not rate-limited, for the lookup endpoint");
    }

    #[tokio::test]
    async fn not_modified_carries_the_new_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widget"))
            .respond_with(ResponseTemplate::new(304).insert_header("Last-Modified", "Tue, 02 Jan 2024 00:00:00 GMT"))
            .mount(&server)
            .await;

        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, auth());

        let (outcome, _) = lookup.lookup("acme/widget", Some("Mon, 01 Jan 2024 00:00:00 GMT")).await.unwrap();
        match outcome {
            LookupOutcome::NotModified { last_modified } => assert_eq!(last_modified.as_deref(), Some("Tue, 02 Jan 2024 00:00:00 GMT")),
            other => panic!("expected NotModified, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_status_is_transient_without_rate_limit() {
        let server = MockServer::start().await;
        // 422 is chosen because it isn't retried by `resilient_http`, unlike
        // a 5xx or 429 response, keeping this test fast.
        Mock::given(method("GET")).and(path("/repos/acme/widget")).respond_with(ResponseTemplate::new(422)).mount(&server).await;

        let client = Client::new(reqwest::Client::new(), server.uri());
        let lookup = LookupClient::new(client, auth());

        let (outcome, rate_limit) = lookup.lookup("acme/widget", None).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::Transient));
        assert!(rate_limit.is_none());
    }
}
