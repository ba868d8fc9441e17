//! Command-line and environment configuration.
//!
//! Built once at startup via [`Config::parse`] and passed by reference
//! through every component — no ambient mutable globals.

use camino::Utf8PathBuf;
use clap::Parser;

/// Configuration for a single `star-crawler` run.
#[derive(Debug, Clone, Parser)]
#[command(name = "star-crawler", about = "Crawls GitHub for repositories at or above a star threshold")]
pub struct Config {
    /// Path to the sqlite database to use.
    #[arg(long, default_value = "state/repos.db")]
    pub database: Utf8PathBuf,

    /// Repositories below this star count are not fetched.
    #[arg(long, default_value_t = 5)]
    pub minimum_stars: i64,

    /// Log HTTP requests to ./logs/requests.log
    #[arg(long, default_value_t = false)]
    pub enable_request_log: bool,

    /// Log HTTP responses to ./logs/responses.log
    #[arg(long, default_value_t = false)]
    pub enable_response_log: bool,

    /// Log SQL statements to ./logs/sql.log
    #[arg(long, default_value_t = false)]
    pub enable_sql_log: bool,

    /// GitHub App id.
    #[arg(long, env = "GITHUB_APP_APP_ID")]
    pub github_app_id: String,

    /// GitHub App installation id.
    #[arg(long, env = "GITHUB_APP_INSTALLATION_ID")]
    pub github_installation_id: String,

    /// Path to the GitHub App's private key, PEM-encoded.
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_PEM_FILE_PATH")]
    pub github_private_key_path: Utf8PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::parse_from([
            "star-crawler",
            "--github-app-id",
            "1",
            "--github-installation-id",
            "2",
            "--github-private-key-path",
            "key.pem",
        ]);

        assert_eq!(config.database, Utf8PathBuf::from("state/repos.db"));
        assert_eq!(config.minimum_stars, 5);
        assert!(!config.enable_request_log);
        assert!(!config.enable_response_log);
        assert!(!config.enable_sql_log);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "star-crawler",
            "--database",
            "custom.db",
            "--minimum-stars",
            "50",
            "--enable-sql-log",
            "--github-app-id",
            "1",
            "--github-installation-id",
            "2",
            "--github-private-key-path",
            "key.pem",
        ]);

        assert_eq!(config.database, Utf8PathBuf::from("custom.db"));
        assert_eq!(config.minimum_stars, 50);
        assert!(config.enable_sql_log);
    }
}
