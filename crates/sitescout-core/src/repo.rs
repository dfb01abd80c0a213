use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::ExtractionResult;
use crate::traits::Repository;

/// In-memory repository keyed by extraction id.
///
/// The reference implementation of [`Repository`]: saving the same
/// extraction id twice overwrites rather than duplicates. Safe for
/// concurrent append from many workers; each save is one atomic insert.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    results: Arc<Mutex<HashMap<Uuid, ExtractionResult>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.lock().expect("repository lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all stored results, in no particular order.
    pub fn all(&self) -> Vec<ExtractionResult> {
        self.results
            .lock()
            .expect("repository lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl Repository for MemoryRepository {
    async fn save(&self, result: &ExtractionResult) -> Result<(), ExtractError> {
        self.results
            .lock()
            .map_err(|_| ExtractError::Storage("repository lock poisoned".into()))?
            .insert(result.extraction_id, result.clone());
        Ok(())
    }

    async fn get(&self, extraction_id: Uuid) -> Result<Option<ExtractionResult>, ExtractError> {
        Ok(self
            .results
            .lock()
            .map_err(|_| ExtractError::Storage("repository lock poisoned".into()))?
            .get(&extraction_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractionAttempt, ExtractionStatus};

    fn make_result(id: Uuid, status: ExtractionStatus) -> ExtractionResult {
        ExtractionResult {
            extraction_id: id,
            url: "https://example.com".into(),
            status,
            entity: None,
            attempts: vec![ExtractionAttempt::new(1)],
            error: None,
            warnings: vec![],
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let repo = MemoryRepository::new();
        let id = Uuid::new_v4();
        repo.save(&make_result(id, ExtractionStatus::Completed))
            .await
            .unwrap();

        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.extraction_id, id);
        assert_eq!(stored.status, ExtractionStatus::Completed);
    }

    #[tokio::test]
    async fn repeated_save_overwrites_instead_of_duplicating() {
        let repo = MemoryRepository::new();
        let id = Uuid::new_v4();

        repo.save(&make_result(id, ExtractionStatus::Failed))
            .await
            .unwrap();
        repo.save(&make_result(id, ExtractionStatus::Completed))
            .await
            .unwrap();

        assert_eq!(repo.len(), 1);
        let stored = repo.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExtractionStatus::Completed);
    }

    #[tokio::test]
    async fn get_unknown_id_returns_none() {
        let repo = MemoryRepository::new();
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
