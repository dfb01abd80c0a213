use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::entity::DraftEntity;
use crate::error::{ErrorKind, ExtractError};

pub const MIN_CRAWL_DEPTH: u8 = 1;
pub const MAX_CRAWL_DEPTH: u8 = 4;
pub const MAX_FETCH_RETRIES: u32 = 10;

/// Which stages of extraction are requested for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    pub extract_contact: bool,
    pub extract_products: bool,
    pub use_ai: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            extract_contact: true,
            extract_products: true,
            use_ai: false,
        }
    }
}

/// Immutable description of one extraction run. Built once, validated by
/// the orchestrator before the first fetch, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub url: String,
    pub crawl_depth: u8,
    pub options: ExtractOptions,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl ExtractionRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            crawl_depth: 1,
            options: ExtractOptions::default(),
            max_retries: 3,
            timeout_secs: 30,
        }
    }

    pub fn with_crawl_depth(mut self, depth: u8) -> Self {
        self.crawl_depth = depth;
        self
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Check URL shape and parameter ranges.
    pub fn validate(&self) -> Result<(), ExtractError> {
        let parsed =
            Url::parse(&self.url).map_err(|e| ExtractError::InvalidUrl(format!("{}: {e}", self.url)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ExtractError::InvalidUrl(format!(
                    "scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }
        if parsed.host_str().is_none() {
            return Err(ExtractError::InvalidUrl(format!("{} has no host", self.url)));
        }
        if !(MIN_CRAWL_DEPTH..=MAX_CRAWL_DEPTH).contains(&self.crawl_depth) {
            return Err(ExtractError::InvalidRequest(format!(
                "crawl_depth {} outside {MIN_CRAWL_DEPTH}..={MAX_CRAWL_DEPTH}",
                self.crawl_depth
            )));
        }
        if self.max_retries > MAX_FETCH_RETRIES {
            return Err(ExtractError::InvalidRequest(format!(
                "max_retries {} exceeds {MAX_FETCH_RETRIES}",
                self.max_retries
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ExtractError::InvalidRequest(
                "timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Terminal disposition of one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::CompletedWithWarnings => "completed_with_warnings",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExtractionStatus::Completed | ExtractionStatus::CompletedWithWarnings
        )
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(ExtractionStatus::Completed),
            "completed_with_warnings" => Ok(ExtractionStatus::CompletedWithWarnings),
            "failed" => Ok(ExtractionStatus::Failed),
            _ => Err(format!("Unknown extraction status: {s}")),
        }
    }
}

/// Outcome of a single pipeline stage within one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StageOutcome {
    /// Stage never ran (earlier stage failed, or it was not requested).
    Skipped,
    Success { detail: String },
    Failure { kind: ErrorKind, detail: String },
}

impl StageOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        StageOutcome::Success {
            detail: detail.into(),
        }
    }

    pub fn failure(error: &ExtractError) -> Self {
        StageOutcome::Failure {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failure { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            StageOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// One try at driving a URL through the pipeline. Appended by the
/// orchestrator, never mutated once the next attempt starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    /// 1-based; strictly increasing within one extraction.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub fetch_outcome: StageOutcome,
    pub extract_outcome: StageOutcome,
    pub enrich_outcome: StageOutcome,
}

impl ExtractionAttempt {
    pub fn new(attempt_number: u32) -> Self {
        Self {
            attempt_number,
            started_at: Utc::now(),
            fetch_outcome: StageOutcome::Skipped,
            extract_outcome: StageOutcome::Skipped,
            enrich_outcome: StageOutcome::Skipped,
        }
    }
}

/// Error context attached to a Failed result, self-contained enough to
/// render in an audit view without consulting the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub attempt_number: u32,
}

impl ErrorRecord {
    pub fn new(error: &ExtractError, attempt_number: u32) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            occurred_at: Utc::now(),
            attempt_number,
        }
    }
}

/// Which external service an [`ApiCallRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    AiEnrichment,
    KnowledgeGraph,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKind::AiEnrichment => "ai_enrichment",
            ApiKind::KnowledgeGraph => "knowledge_graph",
        }
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCallStatus {
    Success,
    Error,
}

/// Write-once record of a single external API call, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub api: ApiKind,
    pub operation: String,
    pub extraction_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: ApiCallStatus,
    pub request_summary: String,
    pub response_summary: String,
}

/// Terminal result of one extraction run, owned by the repository once the
/// orchestrator hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extraction_id: Uuid,
    pub url: String,
    pub status: ExtractionStatus,
    /// Present for successful runs; a Failed run keeps whatever partial
    /// entity was assembled before the fatal error, as a diagnostic aid.
    pub entity: Option<DraftEntity>,
    pub attempts: Vec<ExtractionAttempt>,
    pub error: Option<ErrorRecord>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl ExtractionResult {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn last_attempt(&self) -> Option<&ExtractionAttempt> {
        self.attempts.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_defaults() {
        let req = ExtractionRequest::new("https://example.com");
        assert_eq!(req.crawl_depth, 1);
        assert_eq!(req.max_retries, 3);
        assert_eq!(req.timeout_secs, 30);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn request_rejects_bad_urls() {
        assert!(ExtractionRequest::new("not a url").validate().is_err());
        assert!(
            ExtractionRequest::new("ftp://example.com")
                .validate()
                .is_err()
        );
        assert!(ExtractionRequest::new("/relative/path").validate().is_err());
    }

    #[test]
    fn request_rejects_out_of_range_parameters() {
        let req = ExtractionRequest::new("https://example.com").with_crawl_depth(5);
        assert!(matches!(
            req.validate(),
            Err(ExtractError::InvalidRequest(_))
        ));

        let req = ExtractionRequest::new("https://example.com").with_max_retries(11);
        assert!(req.validate().is_err());

        let req = ExtractionRequest::new("https://example.com").with_timeout_secs(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            ExtractionStatus::Completed,
            ExtractionStatus::CompletedWithWarnings,
            ExtractionStatus::Failed,
        ] {
            let parsed: ExtractionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn stage_outcome_failure_carries_kind() {
        let outcome = StageOutcome::failure(&ExtractError::Http { status: 404 });
        assert!(outcome.is_failure());
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::Http));
    }
}
