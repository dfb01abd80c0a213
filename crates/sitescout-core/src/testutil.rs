//! Hand-rolled test doubles for the pipeline traits.
//!
//! Compiled into the library so downstream crates can drive the
//! orchestrator in their own tests without real HTTP or AI services.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::entity::DraftEntity;
use crate::error::ExtractError;
use crate::model::{
    ApiCallRecord, ApiCallStatus, ApiKind, ErrorRecord, ExtractOptions, ExtractionResult,
};
use crate::traits::{EnrichOutcome, Enricher, Extractor, FetchedPage, Fetcher, Repository};

/// A 200 OK page with the given body.
pub fn page(body: impl Into<String>) -> FetchedPage {
    let body = body.into();
    FetchedPage {
        body,
        final_url: "https://acme.test/".to_string(),
        status: 200,
    }
}

pub fn api_call(
    api: ApiKind,
    extraction_id: Uuid,
    status: ApiCallStatus,
    summary: impl Into<String>,
) -> ApiCallRecord {
    ApiCallRecord {
        api,
        operation: "enrich".to_string(),
        extraction_id,
        started_at: Utc::now(),
        duration_ms: 5,
        status,
        request_summary: "test".to_string(),
        response_summary: summary.into(),
    }
}

/// Fetcher fed from a queue of canned responses, with gauges for
/// asserting call counts and observed concurrency.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<VecDeque<Result<FetchedPage, ExtractError>>>>,
    fallback: Arc<Option<Result<FetchedPage, ExtractError>>>,
    calls: Arc<AtomicUsize>,
    timeouts: Arc<Mutex<Vec<u64>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Duration,
}

impl MockFetcher {
    /// Answers every fetch with a 200 page carrying `body`.
    pub fn new(body: impl Into<String>) -> Self {
        Self::build(VecDeque::new(), Some(Ok(page(body))))
    }

    /// Answers every fetch with a clone of `error`.
    pub fn with_error(error: ExtractError) -> Self {
        Self::build(VecDeque::new(), Some(Err(error)))
    }

    /// Answers fetches from the queue in order; exhaustion is a test bug
    /// and surfaces as a connection error.
    pub fn with_responses(responses: Vec<Result<FetchedPage, ExtractError>>) -> Self {
        Self::build(responses.into(), None)
    }

    fn build(
        responses: VecDeque<Result<FetchedPage, ExtractError>>,
        fallback: Option<Result<FetchedPage, ExtractError>>,
    ) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback: Arc::new(fallback),
            calls: Arc::new(AtomicUsize::new(0)),
            timeouts: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Hold each fetch open for `delay`, so overlapping fetches register
    /// on the concurrency gauge.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timeout (in seconds) passed to each fetch, in call order.
    pub fn timeouts(&self) -> Vec<u64> {
        self.timeouts.lock().unwrap().clone()
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, _url: &str, timeout: Duration) -> Result<FetchedPage, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timeouts.lock().unwrap().push(timeout.as_secs());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| (*self.fallback).clone())
            .unwrap_or_else(|| Err(ExtractError::Connection("mock queue exhausted".into())));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Extractor returning canned [`crate::traits::PageExtract`] values.
#[derive(Clone)]
pub struct MockExtractor {
    extracts: Arc<Mutex<VecDeque<crate::traits::PageExtract>>>,
    fixed: Arc<Option<crate::traits::PageExtract>>,
    error: Arc<Option<ExtractError>>,
}

impl MockExtractor {
    /// Returns a clone of `extract` for every page.
    pub fn new(extract: crate::traits::PageExtract) -> Self {
        Self {
            extracts: Arc::new(Mutex::new(VecDeque::new())),
            fixed: Arc::new(Some(extract)),
            error: Arc::new(None),
        }
    }

    /// Returns extracts from the queue in order, then empty extracts.
    pub fn with_extracts(extracts: Vec<crate::traits::PageExtract>) -> Self {
        Self {
            extracts: Arc::new(Mutex::new(extracts.into())),
            fixed: Arc::new(None),
            error: Arc::new(None),
        }
    }

    /// Fails every page with a clone of `error`.
    pub fn with_error(error: ExtractError) -> Self {
        Self {
            extracts: Arc::new(Mutex::new(VecDeque::new())),
            fixed: Arc::new(None),
            error: Arc::new(Some(error)),
        }
    }
}

impl Extractor for MockExtractor {
    fn extract(
        &self,
        _html: &str,
        _base_url: &str,
        _options: &ExtractOptions,
    ) -> Result<crate::traits::PageExtract, ExtractError> {
        if let Some(error) = (*self.error).as_ref() {
            return Err(error.clone());
        }
        if let Some(extract) = self.extracts.lock().unwrap().pop_front() {
            return Ok(extract);
        }
        Ok((*self.fixed).clone().unwrap_or_default())
    }
}

enum EnrichBehavior {
    Passthrough,
    Entity(DraftEntity),
    ApiError(String),
    AuthError(String),
}

/// Enricher with scripted behavior and a call counter.
#[derive(Clone)]
pub struct MockEnricher {
    behavior: Arc<EnrichBehavior>,
    calls: Arc<AtomicUsize>,
}

impl MockEnricher {
    pub fn passthrough() -> Self {
        Self::build(EnrichBehavior::Passthrough)
    }

    /// Every call succeeds and replaces the draft with `entity`.
    pub fn with_entity(entity: DraftEntity) -> Self {
        Self::build(EnrichBehavior::Entity(entity))
    }

    /// Every call fails with a non-auth API error, draft passes through.
    pub fn with_api_error(message: impl Into<String>) -> Self {
        Self::build(EnrichBehavior::ApiError(message.into()))
    }

    /// Every call fails with a rejected credential.
    pub fn with_auth_error(message: impl Into<String>) -> Self {
        Self::build(EnrichBehavior::AuthError(message.into()))
    }

    fn build(behavior: EnrichBehavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Enricher for MockEnricher {
    async fn enrich(&self, draft: DraftEntity, extraction_id: Uuid) -> EnrichOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.behavior {
            EnrichBehavior::Passthrough => {
                let mut outcome = EnrichOutcome::unchanged(draft);
                outcome.api_calls.push(api_call(
                    ApiKind::AiEnrichment,
                    extraction_id,
                    ApiCallStatus::Success,
                    "ok",
                ));
                outcome
            }
            EnrichBehavior::Entity(entity) => {
                let mut outcome = EnrichOutcome::unchanged(entity.clone());
                outcome.api_calls.push(api_call(
                    ApiKind::AiEnrichment,
                    extraction_id,
                    ApiCallStatus::Success,
                    "ok",
                ));
                outcome
            }
            EnrichBehavior::ApiError(message) => EnrichOutcome {
                entity: draft,
                warnings: vec![message.clone()],
                api_calls: vec![api_call(
                    ApiKind::AiEnrichment,
                    extraction_id,
                    ApiCallStatus::Error,
                    message.clone(),
                )],
                auth_failed: false,
            },
            EnrichBehavior::AuthError(message) => EnrichOutcome {
                entity: draft,
                warnings: vec![message.clone()],
                api_calls: vec![api_call(
                    ApiKind::AiEnrichment,
                    extraction_id,
                    ApiCallStatus::Error,
                    message.clone(),
                )],
                auth_failed: true,
            },
        }
    }
}

/// Repository counting saves, optionally failing them.
#[derive(Clone, Default)]
pub struct MockRepository {
    saved: Arc<Mutex<Vec<ExtractionResult>>>,
    save_error: Arc<Option<ExtractError>>,
    saves: Arc<AtomicUsize>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_error(error: ExtractError) -> Self {
        Self {
            save_error: Arc::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<ExtractionResult> {
        self.saved.lock().unwrap().clone()
    }
}

impl Repository for MockRepository {
    async fn save(&self, result: &ExtractionResult) -> Result<(), ExtractError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = (*self.save_error).as_ref() {
            return Err(error.clone());
        }
        self.saved.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn get(&self, extraction_id: Uuid) -> Result<Option<ExtractionResult>, ExtractError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.extraction_id == extraction_id)
            .cloned())
    }
}

/// Owned copy of one audit record, for assertions after the run.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    Attempt {
        extraction_id: Uuid,
        url: String,
        attempt_number: u32,
    },
    ApiCall(ApiCallRecord),
    Error {
        extraction_id: Uuid,
        url: String,
        error: ErrorRecord,
    },
}

/// Sink that keeps owned copies of everything it sees.
#[derive(Clone, Default)]
pub struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn api_calls(&self) -> Vec<ApiCallRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::ApiCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, AuditEvent::Attempt { .. }))
            .count()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Error { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: AuditRecord<'_>) {
        let event = match record {
            AuditRecord::Attempt {
                extraction_id,
                url,
                attempt,
            } => AuditEvent::Attempt {
                extraction_id,
                url: url.to_string(),
                attempt_number: attempt.attempt_number,
            },
            AuditRecord::ApiCall(call) => AuditEvent::ApiCall(call.clone()),
            AuditRecord::Error {
                extraction_id,
                url,
                error,
            } => AuditEvent::Error {
                extraction_id,
                url: url.to_string(),
                error: error.clone(),
            },
        };
        self.events.lock().unwrap().push(event);
    }
}
