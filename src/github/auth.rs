//! GitHub App authentication: mints a short-lived JWT from the App's
//! private key, exchanges it for an installation access token, and caches
//! the token until it nears expiry.
//!
//! Grounded on `original_source/fetcher/github_app.go`, which delegates the
//! equivalent refresh-on-demand behavior to the `beatlabs/github-auth`
//! library; there is no such library in this ecosystem's corpus, so the
//! exchange is implemented directly against GitHub's REST endpoint.

use camino::Utf8Path;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use ohno::IntoAppError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const JWT_VALIDITY: Duration = Duration::minutes(9);
const REFRESH_MARGIN: Duration = Duration::seconds(60);
const INSTALLATION_TOKEN_URL: &str = "https://api.github.com/app/installations";

#[derive(Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches GitHub App installation access tokens.
#[derive(Debug)]
pub struct AppAuth {
    app_id: String,
    installation_id: String,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl AppAuth {
    /// Reads the PEM-encoded private key from `private_key_path` and builds
    /// a new authenticator. Does not contact GitHub until [`Self::token`]
    /// is first called.
    pub fn new(app_id: impl Into<String>, installation_id: impl Into<String>, private_key_path: &Utf8Path) -> crate::Result<Self> {
        let pem = std::fs::read(private_key_path)
            .into_app_err_with(|| format!("reading GitHub App private key at '{private_key_path}'"))?;
        let encoding_key =
            EncodingKey::from_rsa_pem(&pem).into_app_err_with(|| format!("parsing GitHub App private key at '{private_key_path}'"))?;

        Ok(Self {
            app_id: app_id.into(),
            installation_id: installation_id.into(),
            encoding_key,
            http: reqwest::Client::builder()
                .user_agent("star-crawler")
                .build()
                .into_app_err("building GitHub App HTTP client")?,
            cached: Mutex::new(None),
        })
    }

    fn mint_jwt(&self, now: DateTime<Utc>) -> crate::Result<String> {
        let claims = Claims {
            iat: (now - Duration::seconds(30)).timestamp(),
            exp: (now + JWT_VALIDITY).timestamp(),
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).into_app_err("signing GitHub App JWT")
    }

    async fn exchange_for_installation_token(&self, jwt: &str) -> crate::Result<CachedToken> {
        let url = format!("{INSTALLATION_TOKEN_URL}/{}/access_tokens", self.installation_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .into_app_err("exchanging JWT for an installation access token")?;

        let response = response
            .error_for_status()
            .into_app_err("GitHub rejected the installation access token request")?;

        let body: InstallationTokenResponse = response.json().await.into_app_err("decoding installation access token response")?;

        Ok(CachedToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }

    /// Returns a valid installation access token, minting a new one if the
    /// cached token is missing or within [`REFRESH_MARGIN`] of expiry.
    pub async fn token(&self) -> crate::Result<String> {
        let now = Utc::now();

        {
            let cached = self.cached.lock().await;
            if let Some(cached) = cached.as_ref()
                && cached.expires_at - REFRESH_MARGIN > now
            {
                return Ok(cached.token.clone());
            }
        }

        let jwt = self.mint_jwt(now)?;
        let fresh = self.exchange_for_installation_token(&jwt).await?;
        let token = fresh.token.clone();

        *self.cached.lock().await = Some(fresh);
        Ok(token)
    }

    /// Builds an `AppAuth` pre-seeded with a fixed token that never expires,
    /// for tests that exercise a collaborator needing a token but not the
    /// minting flow itself. Avoids RSA key generation in every such test.
    #[cfg(test)]
    pub fn new_for_tests(token: impl Into<String>) -> Self {
        Self {
            app_id: String::new(),
            installation_id: String::new(),
            encoding_key: EncodingKey::from_secret(&[]),
            http: reqwest::Client::new(),
            cached: Mutex::new(Some(CachedToken { token: token.into(), expires_at: Utc::now() + Duration::days(365) })),
        }
    }
}
