//! Concrete collaborators for the extraction pipeline: a reqwest-backed
//! [`Fetcher`](sitescout_core::traits::Fetcher), a heuristic HTML
//! [`Extractor`](sitescout_core::traits::Extractor), and an AI-backed
//! [`Enricher`](sitescout_core::traits::Enricher).

pub mod enrich;
pub mod fetcher;
pub mod parser;

pub use enrich::AiEnricher;
pub use fetcher::ReqwestFetcher;
pub use parser::HtmlExtractor;
