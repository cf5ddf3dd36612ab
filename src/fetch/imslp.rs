//! IMSLP fetcher: page-based listing of public-domain score PDFs.
//!
//! IMSLP's catalog cannot be queried by date, so the fetcher walks the
//! work listing page by page and filters scores client-side against the
//! configured date range. Only PDF scores with a known page count are
//! returned; the page count drives page selection in the music compiler.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{DownloadError, ScrapeError};
use crate::fetch::http;
use crate::fetch::{Fetcher, ScrapeResult};

/// Works listed per catalog page.
const LIST_WORKS_COUNT: usize = 100;

/// One work (a wiki page) in the IMSLP catalog.
#[derive(Debug, Clone)]
pub struct ImslpWork {
    /// Wiki page title, e.g. `Sonata_No.1_(Composer,_Name)`.
    pub title: String,
}

/// One downloadable score file attached to a work.
#[derive(Debug, Clone)]
pub struct ImslpScore {
    /// File name of the score, e.g. `IMSLP12345-sonata.pdf`.
    pub file_name: String,
    /// Direct download URL.
    pub url: String,
    /// Upload timestamp of the file.
    pub date: DateTime<Utc>,
    /// Page count, when the catalog lists one.
    pub page_count: Option<u32>,
    /// File size in bytes, when known.
    pub size: Option<u64>,
}

/// Catalog side of the IMSLP integration. The production implementation
/// speaks the MediaWiki JSON API; tests script it.
#[async_trait]
pub trait ImslpApi: Send + Sync {
    /// List catalog works starting at `start`, at most `count`.
    /// An empty list means the catalog is exhausted.
    async fn list_works(&self, start: usize, count: usize)
        -> Result<Vec<ImslpWork>, ScrapeError>;

    /// List the score files attached to a work.
    async fn work_scores(&self, work: &ImslpWork) -> Result<Vec<ImslpScore>, ScrapeError>;
}

/// MediaWiki JSON API client for IMSLP.
pub struct MediaWikiImslpApi {
    client: reqwest::Client,
    base_url: String,
}

impl MediaWikiImslpApi {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(timeout, "https://imslp.org/api.php")
    }

    pub fn with_base_url(timeout: Duration, base_url: impl Into<String>) -> Self {
        Self {
            client: http::client(timeout),
            base_url: base_url.into(),
        }
    }

    async fn get_json(&self, params: &[(&str, String)]) -> Result<Value, ScrapeError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| ScrapeError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ScrapeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ImslpApi for MediaWikiImslpApi {
    async fn list_works(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<ImslpWork>, ScrapeError> {
        let raw = self
            .get_json(&[
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("aplimit", count.to_string()),
                ("apoffset", start.to_string()),
                ("format", "json".to_string()),
            ])
            .await?;

        let pages = raw
            .pointer("/query/allpages")
            .and_then(Value::as_array)
            .ok_or_else(|| ScrapeError::InvalidResponse("missing query.allpages".to_string()))?;

        Ok(pages
            .iter()
            .filter_map(|p| p.get("title").and_then(Value::as_str))
            .map(|title| ImslpWork {
                title: title.to_string(),
            })
            .collect())
    }

    async fn work_scores(&self, work: &ImslpWork) -> Result<Vec<ImslpScore>, ScrapeError> {
        let raw = self
            .get_json(&[
                ("action", "query".to_string()),
                ("titles", work.title.clone()),
                ("prop", "images|imageinfo".to_string()),
                ("iiprop", "url|timestamp|size".to_string()),
                ("generator", "images".to_string()),
                ("format", "json".to_string()),
            ])
            .await?;

        let Some(pages) = raw.pointer("/query/pages").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut scores = Vec::new();
        for page in pages.values() {
            let Some(info) = page
                .get("imageinfo")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
            else {
                continue;
            };
            let Some(url) = info.get("url").and_then(Value::as_str) else {
                continue;
            };
            let Some(date) = info
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
            else {
                continue;
            };
            let file_name = url.rsplit('/').next().unwrap_or_default().to_string();
            scores.push(ImslpScore {
                file_name,
                url: url.to_string(),
                date,
                page_count: page
                    .get("pagecount")
                    .and_then(Value::as_u64)
                    .map(|c| c as u32),
                size: info.get("size").and_then(Value::as_u64),
            });
        }
        Ok(scores)
    }
}

/// Fetcher for music scores from IMSLP.
pub struct ImslpFetcher {
    api: Box<dyn ImslpApi>,
    date_created_after: DateTime<Utc>,
    date_created_before: DateTime<Utc>,
    page: usize,
    pending: Vec<ImslpWork>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ImslpFetcher {
    pub fn new(
        api: Box<dyn ImslpApi>,
        date_created_after: DateTime<Utc>,
        date_created_before: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            date_created_after,
            date_created_before,
            page: 0,
            pending: Vec::new(),
            client: http::client(timeout),
            timeout,
        }
    }

    fn accepts(&self, score: &ImslpScore) -> bool {
        score.date >= self.date_created_after
            && score.date <= self.date_created_before
            && score.file_name.to_lowercase().ends_with(".pdf")
            && score.page_count.is_some()
    }

    fn to_scrape_result(score: ImslpScore) -> ScrapeResult {
        let mut additional_info = Map::new();
        if let Some(page_count) = score.page_count {
            additional_info.insert("page_count".to_string(), Value::from(page_count));
        }
        if let Some(size) = score.size {
            additional_info.insert("size_bytes".to_string(), Value::from(size));
        }
        ScrapeResult {
            download_url: score.url,
            instance_name: ScrapeResult::sanitize_name(&score.file_name),
            date: score.date,
            additional_info,
        }
    }
}

#[async_trait]
impl Fetcher for ImslpFetcher {
    async fn scrape(&mut self, count: usize) -> Result<Vec<ScrapeResult>, ScrapeError> {
        let mut results = Vec::new();

        while results.len() < count {
            if self.pending.is_empty() {
                let works = self
                    .api
                    .list_works(self.page * LIST_WORKS_COUNT, LIST_WORKS_COUNT)
                    .await?;
                if works.is_empty() {
                    // The catalog has no more works: permanent for this run.
                    return Err(ScrapeError::Exhausted {
                        floor: self.date_created_after.format("%Y-%m-%d").to_string(),
                    });
                }
                tracing::debug!(page = self.page, works = works.len(), "IMSLP page listed");
                self.pending = works;
                self.page += 1;
            }

            while let Some(work) = self.pending.pop() {
                let scores = self.api.work_scores(&work).await?;
                for score in scores {
                    if !self.accepts(&score) {
                        continue;
                    }
                    tracing::debug!(
                        file = %score.file_name,
                        pages = score.page_count,
                        date = %score.date.format("%Y-%m-%d"),
                        "IMSLP score found"
                    );
                    results.push(Self::to_scrape_result(score));
                }
                if results.len() >= count {
                    break;
                }
            }
        }

        Ok(results)
    }

    async fn download(
        &self,
        destination_path: &Path,
        result: &ScrapeResult,
    ) -> Result<(), DownloadError> {
        if !destination_path.exists() {
            return Err(DownloadError::MissingDestination(
                destination_path.to_path_buf(),
            ));
        }
        http::download_file(
            &self.client,
            &result.download_url,
            &destination_path.join(&result.instance_name),
            self.timeout,
        )
        .await
    }

    fn notify_window_stale(&mut self) {
        // The catalog cannot be queried by date; tighten the accepted
        // range so stale uploads stop matching.
        self.date_created_before = self.date_created_before - chrono::Duration::days(1);
        tracing::debug!(
            before = %self.date_created_before.format("%Y-%m-%d"),
            "IMSLP accepted date range tightened"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    struct ScriptedApi {
        pages: Mutex<Vec<Vec<ImslpWork>>>,
        scores: Mutex<Vec<Vec<ImslpScore>>>,
    }

    #[async_trait]
    impl ImslpApi for ScriptedApi {
        async fn list_works(
            &self,
            _start: usize,
            _count: usize,
        ) -> Result<Vec<ImslpWork>, ScrapeError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn work_scores(&self, _work: &ImslpWork) -> Result<Vec<ImslpScore>, ScrapeError> {
            let mut scores = self.scores.lock().unwrap();
            if scores.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(scores.remove(0))
            }
        }
    }

    fn work(title: &str) -> ImslpWork {
        ImslpWork {
            title: title.to_string(),
        }
    }

    fn score(file: &str, d: DateTime<Utc>, pages: Option<u32>) -> ImslpScore {
        ImslpScore {
            file_name: file.to_string(),
            url: format!("https://imslp.org/images/x/{file}"),
            date: d,
            page_count: pages,
            size: Some(1024),
        }
    }

    fn fetcher(api: ScriptedApi) -> ImslpFetcher {
        ImslpFetcher::new(
            Box::new(api),
            date(2010, 1, 1),
            date(2020, 1, 1),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn scrape_filters_on_date_extension_and_page_count() {
        let api = ScriptedApi {
            pages: Mutex::new(vec![vec![work("Sonata")]]),
            scores: Mutex::new(vec![vec![
                score("keep.pdf", date(2015, 6, 1), Some(12)),
                score("too_old.pdf", date(2001, 1, 1), Some(8)),
                score("not_a_pdf.jpg", date(2015, 6, 1), Some(8)),
                score("no_pages.pdf", date(2015, 6, 1), None),
            ]]),
        };
        let mut fetcher = fetcher(api);
        let results = fetcher.scrape(1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].instance_name, "keep.pdf");
        assert_eq!(results[0].additional_info["page_count"], 12);
    }

    #[tokio::test]
    async fn empty_catalog_is_exhaustion() {
        let api = ScriptedApi {
            pages: Mutex::new(vec![]),
            scores: Mutex::new(vec![]),
        };
        let mut fetcher = fetcher(api);
        let err = fetcher.scrape(1).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn download_requires_existing_destination() {
        let api = ScriptedApi {
            pages: Mutex::new(vec![]),
            scores: Mutex::new(vec![]),
        };
        let fetcher = fetcher(api);
        let result = ScrapeResult {
            download_url: "http://imslp.org/images/3/3d/fake.pdf".to_string(),
            instance_name: "fake.pdf".to_string(),
            date: Utc::now(),
            additional_info: Map::new(),
        };
        let err = fetcher
            .download(Path::new("/nonexistent-structforge-path"), &result)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingDestination(_)));
    }

    #[test]
    fn stale_notification_tightens_upper_bound() {
        let api = ScriptedApi {
            pages: Mutex::new(vec![]),
            scores: Mutex::new(vec![]),
        };
        let mut fetcher = fetcher(api);
        let before = fetcher.date_created_before;
        fetcher.notify_window_stale();
        assert_eq!(before - fetcher.date_created_before, chrono::Duration::days(1));
    }
}
