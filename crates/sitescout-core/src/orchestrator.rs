use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::entity::DraftEntity;
use crate::error::ExtractError;
use crate::model::{
    ErrorRecord, ExtractionAttempt, ExtractionRequest, ExtractionResult, ExtractionStatus,
    StageOutcome,
};
use crate::settings::Settings;
use crate::traits::{Enricher, Extractor, FetchedPage, Fetcher, Repository};

/// Pipeline stages for one URL. Terminal dispositions live in
/// [`ExtractionStatus`]; this enum only names the work in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    Extracting,
    Enriching,
    Validating,
}

/// Mutable state accumulated while driving one request to a terminal state.
struct RunContext {
    extraction_id: Uuid,
    url: String,
    attempts: Vec<ExtractionAttempt>,
    entity: Option<DraftEntity>,
    error: Option<ErrorRecord>,
    warnings: Vec<String>,
}

impl RunContext {
    fn new(extraction_id: Uuid, url: String) -> Self {
        Self {
            extraction_id,
            url,
            attempts: Vec::new(),
            entity: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn current_attempt_number(&self) -> u32 {
        self.attempts.len() as u32
    }

    fn last_attempt_mut(&mut self) -> &mut ExtractionAttempt {
        // An attempt is always pushed before any stage outcome is written.
        self.attempts
            .last_mut()
            .expect("attempt recorded before stage outcome")
    }

    fn fail(&mut self, error: &ExtractError) {
        let attempt = self.current_attempt_number().max(1);
        self.error = Some(ErrorRecord::new(error, attempt));
    }
}

/// Per-URL extraction orchestrator.
///
/// Drives the state machine `Fetching → Extracting → Enriching → Validating`
/// to a terminal [`ExtractionStatus`], applying retry with exponential
/// backoff to transient fetch failures, bounded link-following for deeper
/// crawls, graceful degradation of enrichment failures, and at-most-once
/// persistence of the terminal result.
///
/// Generic over all collaborators via traits, enabling dependency injection
/// and testability without real HTTP or AI calls.
pub struct ExtractionPipeline<F, X, E, R>
where
    F: Fetcher,
    X: Extractor,
    E: Enricher,
    R: Repository,
{
    fetcher: F,
    extractor: X,
    enricher: E,
    repository: R,
    settings: Settings,
}

impl<F, X, E, R> ExtractionPipeline<F, X, E, R>
where
    F: Fetcher,
    X: Extractor,
    E: Enricher,
    R: Repository,
{
    pub fn new(fetcher: F, extractor: X, enricher: E, repository: R, settings: Settings) -> Self {
        Self {
            fetcher,
            extractor,
            enricher,
            repository,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one request to a terminal state. Never panics and never returns
    /// early without a result: every outcome, including cancellation, is
    /// reported as an [`ExtractionResult`] with at least one attempt.
    pub async fn run<A: AuditSink>(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
        audit: &A,
    ) -> ExtractionResult {
        let extraction_id = Uuid::new_v4();
        let started = Instant::now();
        let mut ctx = RunContext::new(extraction_id, request.url.clone());

        tracing::info!(%extraction_id, url = %request.url, "Starting extraction");

        if let Err(e) = request.validate() {
            let mut attempt = ExtractionAttempt::new(1);
            attempt.fetch_outcome = StageOutcome::failure(&e);
            ctx.attempts.push(attempt);
            audit.record(AuditRecord::Attempt {
                extraction_id: ctx.extraction_id,
                url: &ctx.url,
                attempt: &ctx.attempts[0],
            });
            ctx.fail(&e);
            return self.finalize(ctx, request, started, audit).await;
        }

        let mut stage = Stage::Fetching;
        let mut page: Option<FetchedPage> = None;

        loop {
            match stage {
                Stage::Fetching => {
                    match self.fetch_with_retry(request, &mut ctx, cancel, audit).await {
                        Some(fetched) => {
                            page = Some(fetched);
                            stage = Stage::Extracting;
                        }
                        // Terminal fetch failure; error already recorded.
                        None => break,
                    }
                }
                Stage::Extracting => {
                    let fetched = page.as_ref().expect("page fetched before extracting");
                    match self
                        .extractor
                        .extract(&fetched.body, &fetched.final_url, &request.options)
                    {
                        Ok(extract) => {
                            ctx.last_attempt_mut().extract_outcome = StageOutcome::success(
                                format!("{} products", extract.entity.products.len()),
                            );
                            ctx.entity = Some(extract.entity);
                            let links = extract.candidate_links;

                            if request.options.extract_products && request.crawl_depth > 1 {
                                self.follow_links(request, &mut ctx, &links, cancel).await;
                                if ctx.error.is_some() {
                                    // Cancelled mid-crawl.
                                    break;
                                }
                            }

                            stage = if request.options.use_ai
                                && self.settings.enable_advanced_features
                            {
                                Stage::Enriching
                            } else {
                                Stage::Validating
                            };
                        }
                        Err(e) => {
                            // Parsing failures are never retried: the
                            // content will not change on a re-fetch.
                            ctx.last_attempt_mut().extract_outcome = StageOutcome::failure(&e);
                            ctx.fail(&e);
                            break;
                        }
                    }
                }
                Stage::Enriching => {
                    self.enrich(&mut ctx, cancel, audit).await;
                    stage = Stage::Validating;
                }
                Stage::Validating => break,
            }
        }

        self.finalize(ctx, request, started, audit).await
    }

    /// Fetch the root URL, retrying transient failures with exponential
    /// backoff until `max_retries` is exhausted. Each try appends one
    /// [`ExtractionAttempt`]; permanent failures stop immediately.
    async fn fetch_with_retry<A: AuditSink>(
        &self,
        request: &ExtractionRequest,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
        audit: &A,
    ) -> Option<FetchedPage> {
        let max_attempts = request.max_retries + 1;

        loop {
            let attempt_number = ctx.current_attempt_number() + 1;
            let mut attempt = ExtractionAttempt::new(attempt_number);

            if cancel.is_cancelled() {
                attempt.fetch_outcome = StageOutcome::failure(&ExtractError::Cancelled);
                ctx.attempts.push(attempt);
                audit.record(AuditRecord::Attempt {
                    extraction_id: ctx.extraction_id,
                    url: &ctx.url,
                    attempt: &ctx.attempts[ctx.attempts.len() - 1],
                });
                ctx.fail(&ExtractError::Cancelled);
                return None;
            }

            let timeout = Duration::from_secs(request.timeout_secs);
            let outcome = tokio::select! {
                res = self.fetcher.fetch(&request.url, timeout) => res,
                () = cancel.cancelled() => Err(ExtractError::Cancelled),
            };

            match outcome {
                Ok(fetched) => {
                    attempt.fetch_outcome = StageOutcome::success(format!(
                        "HTTP {} ({} bytes)",
                        fetched.status,
                        fetched.body.len()
                    ));
                    ctx.attempts.push(attempt);
                    return Some(fetched);
                }
                Err(e) => {
                    attempt.fetch_outcome = StageOutcome::failure(&e);
                    ctx.attempts.push(attempt);
                    audit.record(AuditRecord::Attempt {
                        extraction_id: ctx.extraction_id,
                        url: &ctx.url,
                        attempt: &ctx.attempts[ctx.attempts.len() - 1],
                    });

                    let retryable = e.is_transient()
                        && !matches!(e, ExtractError::Cancelled)
                        && attempt_number < max_attempts;
                    if !retryable {
                        ctx.fail(&e);
                        return None;
                    }

                    let delay = self.settings.retry.delay_for_attempt(attempt_number);
                    tracing::warn!(
                        extraction_id = %ctx.extraction_id,
                        url = %request.url,
                        attempt = attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            ctx.fail(&ExtractError::Cancelled);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Fetch candidate in-domain links through nested Fetch→Extract cycles
    /// (never Enrich), merging their findings into the root draft. Depth
    /// and the visited set are owned here; nested fetch failures degrade
    /// to warnings rather than failing the extraction.
    async fn follow_links(
        &self,
        request: &ExtractionRequest,
        ctx: &mut RunContext,
        root_links: &[String],
        cancel: &CancellationToken,
    ) {
        let depth = request.crawl_depth.min(self.settings.max_crawl_depth);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(request.url.clone());

        // A depth cap of 0 disables link-following entirely.
        let mut queue: VecDeque<(String, u8)> = root_links
            .iter()
            .map(|link| (link.clone(), depth.saturating_sub(1)))
            .collect();
        let mut fetched_pages = 0usize;

        while let Some((link, remaining)) = queue.pop_front() {
            if fetched_pages >= self.settings.max_product_pages {
                break;
            }
            if cancel.is_cancelled() {
                ctx.fail(&ExtractError::Cancelled);
                return;
            }
            if remaining == 0 || !visited.insert(link.clone()) {
                continue;
            }

            fetched_pages += 1;
            let timeout = Duration::from_secs(request.timeout_secs);
            let page = match self.fetcher.fetch(&link, timeout).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(url = %link, error = %e, "Nested page fetch failed");
                    ctx.warnings.push(format!("skipped {link}: {e}"));
                    continue;
                }
            };

            match self
                .extractor
                .extract(&page.body, &page.final_url, &request.options)
            {
                Ok(sub) => {
                    if let Some(entity) = ctx.entity.as_mut() {
                        entity.merge(sub.entity);
                    }
                    if remaining > 1 {
                        for nested in sub.candidate_links {
                            queue.push_back((nested, remaining - 1));
                        }
                    }
                }
                Err(e) => {
                    ctx.warnings.push(format!("unparseable page {link}: {e}"));
                }
            }
        }
    }

    /// Run enrichment on the assembled draft. Failures downgrade the run
    /// (warnings, `CompletedWithWarnings`) unless `fallback_to_basic` is
    /// disabled, in which case a failed enrichment fails the pipeline.
    async fn enrich<A: AuditSink>(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
        audit: &A,
    ) {
        let Some(draft) = ctx.entity.clone() else {
            return;
        };

        let outcome = tokio::select! {
            outcome = self.enricher.enrich(draft, ctx.extraction_id) => outcome,
            () = cancel.cancelled() => {
                ctx.last_attempt_mut().enrich_outcome =
                    StageOutcome::failure(&ExtractError::Cancelled);
                ctx.fail(&ExtractError::Cancelled);
                return;
            }
        };

        for call in &outcome.api_calls {
            audit.record(AuditRecord::ApiCall(call));
        }

        let failed = outcome.had_failures();
        ctx.last_attempt_mut().enrich_outcome = if failed {
            let error = if outcome.auth_failed {
                ExtractError::Auth(
                    outcome
                        .warnings
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "credential rejected".into()),
                )
            } else {
                ExtractError::Api {
                    service: "enrichment".into(),
                    status: 0,
                    message: outcome
                        .warnings
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "enrichment failed".into()),
                }
            };

            if !self.settings.fallback_to_basic {
                ctx.fail(&error);
            }
            StageOutcome::failure(&error)
        } else {
            StageOutcome::success(format!("{} API calls", outcome.api_calls.len()))
        };

        ctx.warnings.extend(outcome.warnings);
        // The enriched entity only ever gains data (gap-filling contract),
        // so it replaces the draft even when some calls failed.
        ctx.entity = Some(outcome.entity);
    }

    /// Compute the terminal status, emit the remaining audit records, and
    /// persist the result. This is the only save site: at-most-once
    /// persistence holds because every control path reaches finalize once.
    async fn finalize<A: AuditSink>(
        &self,
        mut ctx: RunContext,
        request: &ExtractionRequest,
        started: Instant,
        audit: &A,
    ) -> ExtractionResult {
        let status = if ctx.error.is_some() {
            ExtractionStatus::Failed
        } else {
            match &ctx.entity {
                Some(entity) if !entity.is_empty() => {
                    if entity.company_name.is_none() {
                        ctx.warnings.push("company name not found".into());
                    }
                    if request.options.extract_contact && !entity.has_contact() {
                        ctx.warnings.push("no contact details found".into());
                    }
                    if request.options.extract_products && entity.products.is_empty() {
                        ctx.warnings.push("no products found".into());
                    }
                    if ctx.warnings.is_empty() {
                        ExtractionStatus::Completed
                    } else {
                        ExtractionStatus::CompletedWithWarnings
                    }
                }
                // The page parsed but nothing extractable was on it, or
                // extraction never ran at all.
                _ => {
                    let error =
                        ExtractError::Parsing("page yielded no extractable data".into());
                    ctx.fail(&error);
                    ExtractionStatus::Failed
                }
            }
        };

        // The final attempt has not been audited yet unless its fetch
        // failed inside the retry loop.
        if let Some(attempt) = ctx.attempts.last()
            && !attempt.fetch_outcome.is_failure()
        {
            audit.record(AuditRecord::Attempt {
                extraction_id: ctx.extraction_id,
                url: &ctx.url,
                attempt,
            });
        }
        if let Some(error) = &ctx.error {
            audit.record(AuditRecord::Error {
                extraction_id: ctx.extraction_id,
                url: &ctx.url,
                error,
            });
        }

        let result = ExtractionResult {
            extraction_id: ctx.extraction_id,
            url: ctx.url,
            status,
            entity: ctx.entity,
            attempts: ctx.attempts,
            error: ctx.error,
            warnings: ctx.warnings,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if let Err(e) = self.repository.save(&result).await {
            // Persistence problems are logged, not propagated: the caller
            // still gets the terminal result it was promised.
            tracing::error!(
                extraction_id = %result.extraction_id,
                error = %e,
                "Failed to persist extraction result"
            );
        }

        tracing::info!(
            extraction_id = %result.extraction_id,
            url = %result.url,
            status = %result.status,
            attempts = result.attempts.len(),
            duration_ms = result.duration_ms,
            "Extraction finished"
        );

        result
    }
}
