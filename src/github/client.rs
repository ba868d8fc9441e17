//! Thin GitHub API client: classifies responses into success, rate-limited,
//! not-found, or permanently failed, extracting rate-limit headers before
//! interpreting the status code.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Rate limit information observed in response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Result of a single GitHub API call.
pub enum GithubApiResult<T> {
    Success(T, Option<RateLimitInfo>),
    RateLimited(RateLimitInfo),
    NotFound(Option<RateLimitInfo>),
    Failed(ohno::AppError, Option<RateLimitInfo>),
}

/// Authenticated GitHub REST API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    request_log: Option<Arc<Mutex<File>>>,
    response_log: Option<Arc<Mutex<File>>>,
}

impl Client {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            request_log: None,
            response_log: None,
        }
    }

    /// Attaches a raw request-dump sink, enabled via `--enable-request-log`.
    #[must_use]
    pub fn with_request_log(mut self, sink: Arc<Mutex<File>>) -> Self {
        self.request_log = Some(sink);
        self
    }

    /// Attaches a raw response-dump sink, enabled via `--enable-response-log`.
    #[must_use]
    pub fn with_response_log(mut self, sink: Arc<Mutex<File>>) -> Self {
        self.response_log = Some(sink);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Issues a GET to `url` with `bearer_token`, classifying the response.
    pub async fn api_call(&self, url: &str, bearer_token: &str) -> GithubApiResult<reqwest::Response> {
        self.api_call_with(self.http.get(url).bearer_auth(bearer_token)).await
    }

    /// Issues a pre-built request, classifying the response. Used by the
    /// lookup client, which adds an `If-Modified-Since` header.
    pub async fn api_call_with(&self, request: reqwest::RequestBuilder) -> GithubApiResult<reqwest::Response> {
        let request = match request.build() {
            Ok(r) => r,
            Err(e) => return GithubApiResult::Failed(e.into(), None),
        };

        let url = request.url().to_string();
        if let Some(sink) = &self.request_log {
            dump_line(sink, &format!("{} {url}", request.method()));
        }

        let resp = match crate::resilient_http::resilient_get_request(&self.http, request).await {
            Ok(r) => r,
            Err(e) => return GithubApiResult::Failed(e, None),
        };

        if let Some(sink) = &self.response_log {
            dump_line(
                sink,
                &format!(
                    "{url} -> {} remaining={:?} reset={:?}",
                    resp.status(),
                    resp.headers().get("x-ratelimit-remaining"),
                    resp.headers().get("x-ratelimit-reset")
                ),
            );
        }

        let rate_limit = extract_rate_limit_from_headers(resp.headers());
        let status = resp.status();

        if status.is_success() || status == reqwest::StatusCode::NOT_MODIFIED {
            return GithubApiResult::Success(resp, rate_limit);
        }

        let status_code = status.as_u16();
        if matches!(status_code, 403 | 429) {
            let rate_limit = rate_limit.unwrap_or_else(|| RateLimitInfo {
                remaining: 0,
                reset_at: Utc::now() + chrono::Duration::seconds(20),
            });
            return GithubApiResult::RateLimited(rate_limit);
        }

        if matches!(status_code, 404 | 451) {
            return GithubApiResult::NotFound(rate_limit);
        }

        let error = resp.error_for_status().expect_err("status is not successful at this point");
        GithubApiResult::Failed(ohno::app_err!("GitHub request to '{url}' failed: {error}"), rate_limit)
    }
}

/// Appends `line` to `sink`, swallowing write errors — a full or unwritable
/// debug log must never take down a crawl.
fn dump_line(sink: &Mutex<File>, line: &str) {
    if let Ok(mut file) = sink.lock() {
        let _ = writeln!(file, "{line}");
    }
}

/// Extracts rate-limit information from GitHub's `X-Ratelimit-*` headers.
#[must_use]
pub fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;
    Some(RateLimitInfo { remaining, reset_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn extracts_rate_limit_from_headers() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));

        let rate_limit = extract_rate_limit_from_headers(&headers).unwrap();
        assert_eq!(rate_limit.remaining, 4999);
        assert_eq!(rate_limit.reset_at.timestamp(), 1_704_067_200);
    }

    #[test]
    fn missing_headers_yield_none() {
        assert!(extract_rate_limit_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn invalid_remaining_yields_none() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("nope"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));
        assert!(extract_rate_limit_from_headers(&headers).is_none());
    }
}
