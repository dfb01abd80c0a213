use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::entity::DraftEntity;
use crate::error::ExtractError;
use crate::model::{ApiCallRecord, ExtractOptions, ExtractionResult};

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    /// URL after redirects; base for resolving relative links.
    pub final_url: String,
    pub status: u16,
}

/// What the extractor found on one page.
#[derive(Debug, Clone, Default)]
pub struct PageExtract {
    pub entity: DraftEntity,
    /// In-domain links worth re-fetching for more product/contact data.
    /// The orchestrator owns depth and cycle control, not the extractor.
    pub candidate_links: Vec<String>,
}

/// Result of the enrichment stage. Enrichment never fails the pipeline,
/// so this is a plain struct rather than a `Result`.
#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    pub entity: DraftEntity,
    pub warnings: Vec<String>,
    /// One record per external call made, success or not.
    pub api_calls: Vec<ApiCallRecord>,
    /// Set when a service rejected the configured credential; the batch
    /// scheduler uses this to stop burning the credential on later URLs.
    pub auth_failed: bool,
}

impl EnrichOutcome {
    /// An outcome that passes the draft through untouched.
    pub fn unchanged(entity: DraftEntity) -> Self {
        Self {
            entity,
            warnings: Vec::new(),
            api_calls: Vec::new(),
            auth_failed: false,
        }
    }

    pub fn had_failures(&self) -> bool {
        self.auth_failed
            || self
                .api_calls
                .iter()
                .any(|c| c.status == crate::model::ApiCallStatus::Error)
    }
}

/// Performs one HTTP GET with the given deadline. A single pure attempt:
/// no retry logic here, the orchestrator decides retryability.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<FetchedPage, ExtractError>> + Send;
}

/// Parses raw HTML into a draft entity. Deterministic: no network,
/// no randomness.
pub trait Extractor: Send + Sync + Clone {
    fn extract(
        &self,
        html: &str,
        base_url: &str,
        options: &ExtractOptions,
    ) -> Result<PageExtract, ExtractError>;
}

/// Refines a draft entity via external AI/knowledge-graph services.
/// Failures degrade to the input draft plus warnings.
pub trait Enricher: Send + Sync + Clone {
    fn enrich(
        &self,
        draft: DraftEntity,
        extraction_id: Uuid,
    ) -> impl Future<Output = EnrichOutcome> + Send;
}

/// Persists terminal extraction results. `save` must be idempotent on
/// repeated calls with the same extraction id (overwrite, not duplicate).
pub trait Repository: Send + Sync + Clone {
    fn save(
        &self,
        result: &ExtractionResult,
    ) -> impl Future<Output = Result<(), ExtractError>> + Send;

    fn get(
        &self,
        extraction_id: Uuid,
    ) -> impl Future<Output = Result<Option<ExtractionResult>, ExtractError>> + Send;
}

/// Enricher that passes every draft through untouched. Used when AI
/// enrichment is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEnricher;

impl Enricher for NullEnricher {
    async fn enrich(&self, draft: DraftEntity, _extraction_id: Uuid) -> EnrichOutcome {
        EnrichOutcome::unchanged(draft)
    }
}

/// A no-op Repository for use when persistence is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRepository;

impl Repository for NullRepository {
    async fn save(&self, _result: &ExtractionResult) -> Result<(), ExtractError> {
        Ok(())
    }

    async fn get(&self, _extraction_id: Uuid) -> Result<Option<ExtractionResult>, ExtractError> {
        Ok(None)
    }
}
