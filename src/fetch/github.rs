//! GitHub fetcher: windowed Search API queries for small GitHub Pages
//! repositories, downloaded by cloning.
//!
//! The Search API has its own rate limit (30 requests/min authenticated,
//! 10 unauthenticated) separate from the REST API, and never returns
//! more than 100 items per page. Queries are bounded by the shared date
//! window instead of deep pagination.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{DownloadError, ScrapeError};
use crate::fetch::http;
use crate::fetch::window::DateWindow;
use crate::fetch::{Fetcher, ScrapeResult};

/// Maximum results per search page; the API caps at 100.
const PER_PAGE: usize = 100;

/// Configuration for the repository search query.
#[derive(Debug, Clone)]
pub struct GithubSearchConfig {
    /// Language qualifier (GitHub's primary-language classification).
    pub language: Option<String>,
    /// Maximum repository size in kilobytes.
    pub max_size_kb: u32,
}

impl Default for GithubSearchConfig {
    fn default() -> Self {
        Self {
            language: None,
            max_size_kb: 1000,
        }
    }
}

/// Fetcher for GitHub Pages repositories.
pub struct GithubFetcher {
    client: reqwest::Client,
    token: Option<String>,
    config: GithubSearchConfig,
    window: DateWindow,
    backlog: Vec<ScrapeResult>,
    timeout: Duration,
}

impl GithubFetcher {
    pub fn new(
        token: Option<String>,
        config: GithubSearchConfig,
        date_created_after: DateTime<Utc>,
        date_created_before: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: http::client(Duration::from_secs(30)),
            token,
            config,
            window: DateWindow::new(date_created_after, date_created_before),
            backlog: Vec::new(),
            timeout,
        }
    }

    /// Build the search query string for the given creation-date span.
    fn build_query(
        config: &GithubSearchConfig,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> String {
        let mut parts = vec![
            "github.io in:name".to_string(),
            format!("size:<={}", config.max_size_kb),
            format!(
                "created:{}..{}",
                from.format("%Y-%m-%d"),
                until.format("%Y-%m-%d")
            ),
        ];
        if let Some(ref language) = config.language {
            parts.push(format!("language:{language}"));
        }
        parts.join(" ")
    }

    /// Issue one search query over the current window.
    async fn search(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScrapeResult>, ScrapeError> {
        let query = Self::build_query(&self.config, from, until);
        let url = format!(
            "https://api.github.com/search/repositories?q={}&per_page={}&sort=updated&order=desc",
            urlencoding::encode(&query),
            PER_PAGE,
        );

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "GitHub Search API returned error");
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ScrapeError::InvalidResponse(e.to_string()))?;
        let items = raw
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items.iter().filter_map(parse_repository).collect())
    }
}

/// Parse a single search item into a `ScrapeResult`.
fn parse_repository(item: &Value) -> Option<ScrapeResult> {
    let full_name = item.get("full_name").and_then(Value::as_str)?;
    let clone_url = item.get("clone_url").and_then(Value::as_str)?;
    let user = item
        .get("owner")
        .and_then(|o| o.get("login"))
        .and_then(Value::as_str)?;
    let created_at = item
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;

    let mut additional_info = Map::new();
    additional_info.insert("user".to_string(), Value::String(user.to_string()));
    additional_info.insert(
        "full_name".to_string(),
        Value::String(full_name.to_string()),
    );
    if let Some(language) = item.get("language").and_then(Value::as_str) {
        additional_info.insert("language".to_string(), Value::String(language.to_string()));
    }
    if let Some(stars) = item.get("stargazers_count").and_then(Value::as_u64) {
        additional_info.insert("stars".to_string(), Value::from(stars));
    }
    if let Some(size) = item.get("size").and_then(Value::as_u64) {
        additional_info.insert("size_kb".to_string(), Value::from(size));
    }

    Some(ScrapeResult {
        download_url: clone_url.to_string(),
        instance_name: ScrapeResult::sanitize_name(full_name),
        date: created_at,
        additional_info,
    })
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn scrape(&mut self, count: usize) -> Result<Vec<ScrapeResult>, ScrapeError> {
        while self.backlog.len() < count {
            let needed = count - self.backlog.len();
            let (from, until) = self.window.advance(needed)?;
            let results = self.search(from, until).await?;
            self.window.observe(results.len());
            tracing::debug!(
                from = %from.format("%Y-%m-%d"),
                until = %until.format("%Y-%m-%d"),
                repositories = results.len(),
                rate = self.window.rate_per_day(),
                "GitHub window searched"
            );
            self.backlog.extend(results);
        }

        Ok(self.backlog.drain(..count).collect())
    }

    async fn download(
        &self,
        destination_path: &Path,
        result: &ScrapeResult,
    ) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(destination_path).await?;
        let target = destination_path.join(&result.instance_name);

        let mut child = tokio::process::Command::new("git")
            .arg("clone")
            .arg("--depth=1")
            .arg(&result.download_url)
            .arg(&target)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::CloneFailed(e.to_string()))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(DownloadError::CloneFailed(format!(
                "git clone of {} exited with {status}",
                result.instance_name
            ))),
            Ok(Err(e)) => Err(DownloadError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                Err(DownloadError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    fn notify_window_stale(&mut self) {
        if self.window.advance(1).is_err() {
            tracing::debug!("GitHub window reached the configured floor");
        }
        self.backlog.clear();
    }
}
