use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::error::ErrorKind;
use crate::model::{ExtractOptions, ExtractionRequest, ExtractionResult, ExtractionStatus};
use crate::orchestrator::ExtractionPipeline;
use crate::traits::{Enricher, Extractor, Fetcher, Repository};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;
pub const MAX_BATCH_CONCURRENCY: usize = 20;
/// Extra passes over URLs that failed with a reschedulable error.
pub const MAX_BATCH_RETRIES: u32 = 3;

/// Knobs for one batch run, applied to every URL in it.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Worker parallelism, clamped to `1..=MAX_BATCH_CONCURRENCY`.
    pub concurrency: usize,
    pub extract: ExtractOptions,
    pub crawl_depth: u8,
    /// Per-URL transient fetch retries, passed through to each request.
    pub max_retries: u32,
    /// Batch-level re-enqueue passes for failed URLs.
    pub max_batch_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            extract: ExtractOptions::default(),
            crawl_depth: 1,
            max_retries: 3,
            max_batch_retries: MAX_BATCH_RETRIES,
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_extract(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_crawl_depth(mut self, depth: u8) -> Self {
        self.crawl_depth = depth;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_max_batch_retries(mut self, max: u32) -> Self {
        self.max_batch_retries = max;
        self
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_BATCH_CONCURRENCY)
    }
}

/// Aggregate outcome of one batch run. One result per unique URL.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub completed_with_warnings: usize,
    pub failed: usize,
    pub duplicates_skipped: usize,
    /// True when a rejected credential disabled AI enrichment mid-batch.
    pub ai_disabled: bool,
    pub duration_ms: u64,
    pub results: Vec<ExtractionResult>,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.completed + self.completed_with_warnings
    }
}

/// Fans a list of URLs out over a bounded pool of extraction workers.
///
/// URLs are deduplicated up front; failures with a reschedulable error
/// kind get re-enqueued for later passes (up to `max_batch_retries`).
/// A credential rejection from the enrichment services flips a
/// batch-wide switch that turns AI off for every URL still pending,
/// instead of burning the same broken credential once per URL.
pub struct BatchScheduler<F, X, E, R>
where
    F: Fetcher,
    X: Extractor,
    E: Enricher,
    R: Repository,
{
    pipeline: Arc<ExtractionPipeline<F, X, E, R>>,
}

/// Errors worth another pass at the batch level. Everything the
/// orchestrator classified as permanent for the URL itself (bad URL,
/// unparseable content, rejected credential, cancellation) stays failed.
fn reschedulable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Connection | ErrorKind::Http | ErrorKind::Api | ErrorKind::Storage
    )
}

impl<F, X, E, R> BatchScheduler<F, X, E, R>
where
    F: Fetcher + 'static,
    X: Extractor + 'static,
    E: Enricher + 'static,
    R: Repository + 'static,
{
    pub fn new(pipeline: ExtractionPipeline<F, X, E, R>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub async fn run<A>(
        &self,
        urls: Vec<String>,
        options: BatchOptions,
        cancel: CancellationToken,
        audit: Arc<A>,
    ) -> BatchSummary
    where
        A: AuditSink + 'static,
    {
        let started = Instant::now();

        let mut seen: HashSet<String> = HashSet::new();
        let mut pending: Vec<String> = Vec::new();
        let mut duplicates_skipped = 0usize;
        for url in urls {
            if seen.insert(url.clone()) {
                pending.push(url);
            } else {
                duplicates_skipped += 1;
            }
        }

        let total = pending.len();
        tracing::info!(
            total,
            duplicates_skipped,
            concurrency = options.effective_concurrency(),
            "Starting batch extraction"
        );

        let ai_disabled = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(Semaphore::new(options.effective_concurrency()));
        let mut results: Vec<ExtractionResult> = Vec::with_capacity(total);
        let mut pass = 0u32;

        while !pending.is_empty() {
            let mut round: Vec<ExtractionResult> = Vec::with_capacity(pending.len());
            let mut tasks = JoinSet::new();

            for url in pending.drain(..) {
                let pipeline = Arc::clone(&self.pipeline);
                let semaphore = Arc::clone(&semaphore);
                let ai_disabled = Arc::clone(&ai_disabled);
                let audit = Arc::clone(&audit);
                let cancel = cancel.clone();
                let options = options.clone();

                tasks.spawn(async move {
                    // A closed semaphore never happens here; treat it the
                    // same as cancellation and let the pipeline report it.
                    let _permit = semaphore.acquire().await;

                    let mut extract = options.extract;
                    if ai_disabled.load(Ordering::SeqCst) {
                        extract.use_ai = false;
                    }
                    let request = ExtractionRequest::new(url)
                        .with_crawl_depth(options.crawl_depth)
                        .with_max_retries(options.max_retries)
                        .with_timeout_secs(pipeline.settings().timeout_secs)
                        .with_options(extract);

                    let result = pipeline.run(&request, &cancel, &audit).await;

                    // Flip the switch before the permit is released, so the
                    // next worker in line already sees AI disabled.
                    if result
                        .last_attempt()
                        .is_some_and(|a| a.enrich_outcome.failure_kind() == Some(ErrorKind::Auth))
                        && !ai_disabled.swap(true, Ordering::SeqCst)
                    {
                        tracing::warn!(
                            url = %result.url,
                            "Credential rejected, disabling AI enrichment for the rest of the batch"
                        );
                    }

                    result
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => round.push(result),
                    Err(e) => {
                        tracing::error!(error = %e, "Extraction worker panicked");
                    }
                }
            }

            let retry_this_round = pass < options.max_batch_retries && !cancel.is_cancelled();
            for result in round {
                let kind = result.error.as_ref().map(|e| e.kind);
                match kind {
                    Some(kind) if retry_this_round && reschedulable(kind) => {
                        tracing::info!(url = %result.url, %kind, pass, "Re-enqueueing failed URL");
                        pending.push(result.url);
                    }
                    _ => results.push(result),
                }
            }

            pass += 1;
        }

        let mut summary = BatchSummary {
            total,
            duplicates_skipped,
            ai_disabled: ai_disabled.load(Ordering::SeqCst),
            duration_ms: started.elapsed().as_millis() as u64,
            results,
            ..BatchSummary::default()
        };
        for result in &summary.results {
            match result.status {
                ExtractionStatus::Completed => summary.completed += 1,
                ExtractionStatus::CompletedWithWarnings => summary.completed_with_warnings += 1,
                ExtractionStatus::Failed => summary.failed += 1,
            }
        }

        tracing::info!(
            total = summary.total,
            completed = summary.completed,
            completed_with_warnings = summary.completed_with_warnings,
            failed = summary.failed,
            ai_disabled = summary.ai_disabled,
            duration_ms = summary.duration_ms,
            "Batch extraction finished"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DraftEntity, ProductRecord};
    use crate::error::ExtractError;
    use crate::audit::NullAuditSink;
    use crate::repo::MemoryRepository;
    use crate::retry::RetryPolicy;
    use crate::settings::Settings;
    use crate::testutil::*;
    use crate::traits::{NullEnricher, PageExtract};
    use std::time::Duration;

    fn fast_settings() -> Settings {
        Settings::default().with_retry(RetryPolicy {
            base: Duration::ZERO,
            cap: Duration::ZERO,
        })
    }

    fn company_extract() -> PageExtract {
        let mut entity = DraftEntity::new();
        entity.company_name = Some("Acme Foods".into());
        entity.add_email("info@acme.test");
        entity.add_product(ProductRecord::new("Tofu Block", "https://acme.test/"));
        PageExtract {
            entity,
            candidate_links: vec![],
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://site{i}.test/")).collect()
    }

    #[tokio::test]
    async fn batch_counts_statuses() {
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            MockFetcher::new("<html>acme</html>"),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                urls(4),
                BatchOptions::default(),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.results.len(), 4);
    }

    #[tokio::test]
    async fn duplicate_urls_are_processed_once() {
        let fetcher = MockFetcher::new("<html>acme</html>");
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                vec![
                    "https://acme.test/".to_string(),
                    "https://acme.test/".to_string(),
                    "https://other.test/".to_string(),
                ],
                BatchOptions::default(),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn concurrency_stays_within_bound() {
        let fetcher =
            MockFetcher::new("<html>acme</html>").with_delay(Duration::from_millis(20));
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                urls(9),
                BatchOptions::default().with_concurrency(3),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.completed, 9);
        assert!(fetcher.max_in_flight() <= 3, "bound exceeded");
    }

    #[tokio::test]
    async fn concurrency_is_clamped() {
        assert_eq!(BatchOptions::default().with_concurrency(0).effective_concurrency(), 1);
        assert_eq!(
            BatchOptions::default().with_concurrency(500).effective_concurrency(),
            MAX_BATCH_CONCURRENCY
        );
    }

    #[tokio::test]
    async fn failed_url_is_re_enqueued_until_it_succeeds() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(ExtractError::Connection("reset".into())),
            Ok(page("<html>acme</html>")),
        ]);
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                vec!["https://flaky.test/".to_string()],
                BatchOptions::default().with_max_retries(0),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.results.len(), 1);
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_re_enqueued() {
        let fetcher = MockFetcher::new("<html>unused</html>");
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                vec!["not-a-url".to_string()],
                BatchOptions::default(),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn re_enqueue_gives_up_after_batch_retry_budget() {
        let fetcher = MockFetcher::with_error(ExtractError::Http { status: 503 });
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                vec!["https://down.test/".to_string()],
                BatchOptions::default()
                    .with_max_retries(0)
                    .with_max_batch_retries(2),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results.len(), 1);
        // Initial pass plus two batch retries, one fetch each.
        assert_eq!(fetcher.call_count(), 3);
    }

    #[tokio::test]
    async fn auth_failure_disables_ai_for_remaining_urls() {
        let enricher = MockEnricher::with_auth_error("invalid API key");
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            MockFetcher::new("<html>acme</html>"),
            MockExtractor::new(company_extract()),
            enricher.clone(),
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                urls(5),
                BatchOptions::default()
                    .with_concurrency(1)
                    .with_extract(ExtractOptions {
                        use_ai: true,
                        ..ExtractOptions::default()
                    }),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert!(summary.ai_disabled);
        // Only the first URL reached the enricher.
        assert_eq!(enricher.call_count(), 1);
        // Auth failure degrades, it does not fail the URL.
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn cancelled_batch_fails_pending_urls() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetcher = MockFetcher::new("<html>acme</html>");
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            fetcher.clone(),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                urls(3),
                BatchOptions::default(),
                cancel,
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let scheduler = BatchScheduler::new(ExtractionPipeline::new(
            MockFetcher::new("<html>acme</html>"),
            MockExtractor::new(company_extract()),
            NullEnricher,
            MemoryRepository::new(),
            fast_settings(),
        ));

        let summary = scheduler
            .run(
                vec![],
                BatchOptions::default(),
                CancellationToken::new(),
                Arc::new(NullAuditSink),
            )
            .await;

        assert_eq!(summary.total, 0);
        assert_eq!(summary.results.len(), 0);
    }
}
