//! Resilient HTTP GET with retry and timeout, reimplemented over plain
//! `reqwest` + `tokio::time` instead of a middleware stack: transient
//! network errors, 5xx, and 429/403-with-`Retry-After` are retried with
//! exponential backoff; everything else is returned as-is.

use core::time::Duration;

/// Timeout for a single request attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum retry attempts on top of the original request.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

enum Recovery {
    Retry(Duration),
    Never,
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

fn classify(result: &Result<reqwest::Response, reqwest::Error>, attempt: u32) -> Recovery {
    let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt);

    match result {
        Err(_) => Recovery::Retry(backoff),
        Ok(resp) if resp.status().is_server_error() => Recovery::Retry(backoff),
        Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
            let delay = parse_retry_after(resp.headers()).map_or(backoff, Duration::from_secs);
            Recovery::Retry(delay)
        }
        Ok(resp) if resp.status() == reqwest::StatusCode::FORBIDDEN => parse_retry_after(resp.headers())
            .map_or(Recovery::Never, |delay| Recovery::Retry(Duration::from_secs(delay))),
        Ok(_) => Recovery::Never,
    }
}

/// Sends an HTTP GET with automatic retry and a per-attempt timeout.
pub async fn resilient_get(client: &reqwest::Client, url: &str) -> crate::Result<reqwest::Response> {
    resilient_get_request(client, client.get(url).build().map_err(ohno::AppError::from)?).await
}

/// Sends a pre-built request with automatic retry and a per-attempt
/// timeout. Each retry attempt re-sends a clone of `request`, so callers
/// must only pass requests with a clonable body (GET requests have none).
pub async fn resilient_get_request(client: &reqwest::Client, request: reqwest::Request) -> crate::Result<reqwest::Response> {
    let url = request.url().to_string();
    let mut attempt = 0;
    loop {
        let Some(attempt_request) = request.try_clone() else {
            return Err(ohno::app_err!("request to '{url}' cannot be cloned for retry"));
        };

        let outcome = tokio::time::timeout(REQUEST_TIMEOUT, client.execute(attempt_request)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                if attempt >= MAX_RETRY_ATTEMPTS {
                    return Err(ohno::app_err!("HTTP request to '{url}' timed out after {MAX_RETRY_ATTEMPTS} retries"));
                }
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                log::debug!(target: "http", "retrying GET '{url}' after timeout (attempt {}, delay {:?})", attempt + 1, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
        };

        match classify(&result, attempt) {
            Recovery::Retry(delay) if attempt < MAX_RETRY_ATTEMPTS => {
                log::debug!(target: "http", "retrying GET '{url}' (attempt {}, delay {:?})", attempt + 1, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            _ => return result.map_err(ohno::AppError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resp = resilient_get(&client, &format!("{}/ok", server.uri())).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resp = resilient_get(&client, &format!("{}/flaky", server.uri())).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resp = resilient_get(&client, &format!("{}/missing", server.uri())).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
