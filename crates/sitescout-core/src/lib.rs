//! Core extraction pipeline: domain model, per-URL orchestrator, and
//! batch scheduler, decoupled from any concrete HTTP client or AI
//! service through the traits in [`traits`].

pub mod audit;
pub mod entity;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod repo;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod testutil;
pub mod traits;

pub use audit::{AuditRecord, AuditSink, NullAuditSink, TracingAuditSink};
pub use entity::{DraftEntity, ProductRecord};
pub use error::{ErrorKind, ExtractError};
pub use model::{
    ApiCallRecord, ApiCallStatus, ApiKind, ErrorRecord, ExtractOptions, ExtractionAttempt,
    ExtractionRequest, ExtractionResult, ExtractionStatus, StageOutcome,
};
pub use orchestrator::ExtractionPipeline;
pub use repo::MemoryRepository;
pub use retry::RetryPolicy;
pub use scheduler::{BatchOptions, BatchScheduler, BatchSummary};
pub use settings::Settings;
pub use traits::{
    EnrichOutcome, Enricher, Extractor, FetchedPage, Fetcher, NullEnricher, NullRepository,
    PageExtract, Repository,
};
