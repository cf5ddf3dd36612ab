//! Metadata-only filters that run before any download.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::FilterError;
use crate::fetch::ScrapeResult;
use crate::filter::FetchFilter;

/// Name of the date-boundary filter. A rejection by this filter (and
/// only this one) tells the orchestrator the fetcher's window is
/// producing stale data and needs to move.
pub const AFTER_DATE_FILTER: &str = "AfterDateFetchFilter";

/// Accepts results dated on or after the configured boundary.
pub struct AfterDateFetchFilter {
    date_created_after: DateTime<Utc>,
}

impl AfterDateFetchFilter {
    pub fn new(date_created_after: DateTime<Utc>) -> Self {
        Self { date_created_after }
    }
}

impl FetchFilter for AfterDateFetchFilter {
    fn name(&self) -> &'static str {
        AFTER_DATE_FILTER
    }

    fn filter(&self, result: &ScrapeResult) -> Result<bool, FilterError> {
        Ok(result.date >= self.date_created_after)
    }
}

/// Accepts the first N results seen for each distinct calendar date.
pub struct DateFetchFilter {
    max_instances_per_date: usize,
    counts: Mutex<HashMap<String, usize>>,
}

impl DateFetchFilter {
    pub fn new(max_instances_per_date: usize) -> Self {
        Self {
            max_instances_per_date,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl FetchFilter for DateFetchFilter {
    fn name(&self) -> &'static str {
        "DateFetchFilter"
    }

    fn filter(&self, result: &ScrapeResult) -> Result<bool, FilterError> {
        let key = result.date.format("%Y-%m-%d").to_string();
        let mut counts = self.counts.lock().expect("date quota lock poisoned");
        let count = counts.entry(key).or_insert(0);
        if *count >= self.max_instances_per_date {
            Ok(false)
        } else {
            *count += 1;
            Ok(true)
        }
    }
}

/// Accepts at most one result per repository identity AND one per author.
pub struct GithubFetchFilter {
    repositories: Mutex<HashSet<String>>,
    users: Mutex<HashSet<String>>,
}

impl GithubFetchFilter {
    pub fn new() -> Self {
        Self {
            repositories: Mutex::new(HashSet::new()),
            users: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for GithubFetchFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchFilter for GithubFetchFilter {
    fn name(&self) -> &'static str {
        "GitHubFetchFilter"
    }

    fn filter(&self, result: &ScrapeResult) -> Result<bool, FilterError> {
        {
            let mut repositories = self
                .repositories
                .lock()
                .expect("repository set lock poisoned");
            if !repositories.insert(result.instance_name.clone()) {
                return Ok(false);
            }
        }

        let user = result
            .additional_info
            .get("user")
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError::MissingMetadata("user".to_string()))?;

        let mut users = self.users.lock().expect("user set lock poisoned");
        Ok(users.insert(user.to_string()))
    }
}
