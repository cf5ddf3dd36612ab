//! Toxicity filter backed by the Perspective comment-analysis API.
//!
//! All readable text files under the artifact are deduplicated and
//! scored in one batch; the artifact is rejected when any file scores
//! above the configured toxicity or sexually-explicit thresholds. A
//! scoring-service failure is an error, never a rejection: callers must
//! not conflate "could not score" with "scored unsafe".

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::FilterError;
use crate::fetch::http;
use crate::filter::{FileFilter, FilterInfo};
use crate::util::fs::list_files_in_dir;

/// Maximum text length accepted by the scoring service per request.
pub const MAX_TEXT_LENGTH: usize = 20_400;

/// Scores returned for one text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToxicityScores {
    pub toxicity: f64,
    pub sexually_explicit: f64,
}

/// Scoring side of the toxicity integration, kept behind a trait so the
/// filter logic is testable without the network.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    /// Score a batch of texts; the result is index-aligned with the
    /// input. A transport or auth failure must be
    /// [`FilterError::ScoringUnavailable`].
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<ToxicityScores>, FilterError>;
}

/// Perspective API client.
pub struct PerspectiveClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(rename = "attributeScores")]
    attribute_scores: serde_json::Map<String, Value>,
}

impl PerspectiveClient {
    const ENDPOINT: &'static str =
        "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http::client(timeout),
            api_key: api_key.into(),
            endpoint: Self::ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        timeout: Duration,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client: http::client(timeout),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn request_body(text: &str) -> Value {
        json!({
            "comment": { "text": text },
            "requestedAttributes": {
                "TOXICITY": {},
                "SEXUALLY_EXPLICIT": {},
            },
            "languages": ["en"],
            "doNotStore": true,
        })
    }

    fn extract_score(response: &AnalyzeResponse, attribute: &str) -> f64 {
        response
            .attribute_scores
            .get(attribute)
            .and_then(|a| a.pointer("/summaryScore/value"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    async fn score_one(&self, text: &str) -> Result<ToxicityScores, FilterError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let response = self
            .client
            .post(&url)
            .json(&Self::request_body(text))
            .send()
            .await
            .map_err(|e| FilterError::ScoringUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FilterError::ScoringUnavailable(format!(
                "HTTP {status}: {body}"
            )));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| FilterError::ScoringUnavailable(e.to_string()))?;
        Ok(ToxicityScores {
            toxicity: Self::extract_score(&parsed, "TOXICITY"),
            sexually_explicit: Self::extract_score(&parsed, "SEXUALLY_EXPLICIT"),
        })
    }
}

#[async_trait]
impl ToxicityScorer for PerspectiveClient {
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<ToxicityScores>, FilterError> {
        let futures = texts.iter().map(|text| self.score_one(text));
        futures::future::try_join_all(futures).await
    }
}

/// Rejects artifacts containing text above the configured thresholds.
pub struct ToxicityFilter {
    scorer: Box<dyn ToxicityScorer>,
    toxicity_threshold: f64,
    sexually_explicit_threshold: f64,
}

impl ToxicityFilter {
    pub fn new(
        scorer: Box<dyn ToxicityScorer>,
        toxicity_threshold: f64,
        sexually_explicit_threshold: f64,
    ) -> Self {
        Self {
            scorer,
            toxicity_threshold,
            sexually_explicit_threshold,
        }
    }

    /// Read all decodable text files under `path`, deduplicated by
    /// content and truncated to the service's maximum length.
    fn collect_texts(path: &Path) -> BTreeMap<String, String> {
        let files = if path.is_dir() {
            list_files_in_dir(path)
        } else {
            vec![String::new()]
        };

        let mut text_to_file = BTreeMap::new();
        for file in files {
            let full = if file.is_empty() {
                path.to_path_buf()
            } else {
                path.join(&file)
            };
            let Ok(content) = std::fs::read_to_string(&full) else {
                continue;
            };
            let truncated: String = content.chars().take(MAX_TEXT_LENGTH).collect();
            let name = if file.is_empty() {
                full.to_string_lossy().into_owned()
            } else {
                file
            };
            text_to_file.entry(truncated).or_insert(name);
        }
        text_to_file
    }
}

#[async_trait]
impl FileFilter for ToxicityFilter {
    fn name(&self) -> &'static str {
        "ToxicityFilter"
    }

    async fn filter(&self, path: &Path) -> Result<(bool, FilterInfo), FilterError> {
        let text_to_file = Self::collect_texts(path);
        if text_to_file.is_empty() {
            return Ok((true, FilterInfo::new()));
        }

        let texts: Vec<String> = text_to_file.keys().cloned().collect();
        let scores = self.scorer.score_batch(&texts).await?;

        let mut per_file = FilterInfo::new();
        let mut reason: Option<String> = None;
        for (text, score) in texts.iter().zip(&scores) {
            let file = &text_to_file[text];
            per_file.insert(
                file.clone(),
                json!({
                    "toxicity_score": score.toxicity,
                    "sexually_explicit_score": score.sexually_explicit,
                }),
            );
            if reason.is_none() {
                if score.toxicity > self.toxicity_threshold {
                    reason = Some("Toxicity score is above the threshold".to_string());
                } else if score.sexually_explicit > self.sexually_explicit_threshold {
                    reason = Some("Sexually explicit score is above the threshold".to_string());
                }
            }
        }

        let mut info = FilterInfo::new();
        info.insert("scores".to_string(), Value::Object(per_file));
        if let Some(ref reason) = reason {
            info.insert("reason".to_string(), Value::String(reason.clone()));
        }
        Ok((reason.is_none(), info))
    }
}
