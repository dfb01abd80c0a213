use std::sync::Arc;

use uuid::Uuid;

use crate::model::{ApiCallRecord, ErrorRecord, ExtractionAttempt};

/// Records emitted by the orchestrator for the audit trail.
#[derive(Debug, Clone)]
pub enum AuditRecord<'a> {
    Attempt {
        extraction_id: Uuid,
        url: &'a str,
        attempt: &'a ExtractionAttempt,
    },
    ApiCall(&'a ApiCallRecord),
    Error {
        extraction_id: Uuid,
        url: &'a str,
        error: &'a ErrorRecord,
    },
}

/// Sink for audit records (decoupled logging). Fire-and-forget: a sink
/// failure must never fail the extraction, so `record` cannot error.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord<'_>) {
        let _ = record;
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, record: AuditRecord<'_>) {
        (**self).record(record);
    }
}

impl<T: AuditSink + ?Sized> AuditSink for &T {
    fn record(&self, record: AuditRecord<'_>) {
        (**self).record(record);
    }
}

/// Sink that writes records through the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord<'_>) {
        match record {
            AuditRecord::Attempt {
                extraction_id,
                url,
                attempt,
            } => {
                tracing::info!(
                    %extraction_id,
                    %url,
                    attempt = attempt.attempt_number,
                    fetch = ?attempt.fetch_outcome,
                    extract = ?attempt.extract_outcome,
                    enrich = ?attempt.enrich_outcome,
                    "Extraction attempt"
                );
            }
            AuditRecord::ApiCall(call) => {
                tracing::info!(
                    extraction_id = %call.extraction_id,
                    api = %call.api,
                    operation = %call.operation,
                    duration_ms = call.duration_ms,
                    status = ?call.status,
                    "External API call"
                );
            }
            AuditRecord::Error {
                extraction_id,
                url,
                error,
            } => {
                tracing::warn!(
                    %extraction_id,
                    %url,
                    kind = %error.kind,
                    attempt = error.attempt_number,
                    message = %error.message,
                    "Extraction error"
                );
            }
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {}
