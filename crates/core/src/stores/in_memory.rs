use crate::traits::VectorIndex;
use crate::{MemoryError, MemoryRecord, ScoredRecord};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryVectorIndex {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn document_ids(&self) -> Vec<String> {
        let mut ids = self
            .records
            .read()
            .await
            .iter()
            .map(|record| record.document_id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_index(&self, _dimensions: usize) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), MemoryError> {
        self.records
            .write()
            .await
            .retain(|record| record.document_id != document_id);
        Ok(())
    }

    async fn upsert(&self, records: &[MemoryRecord]) -> Result<(), MemoryError> {
        let mut stored = self.records.write().await;
        for record in records {
            stored.retain(|existing| existing.record_id != record.record_id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_relevance: f64,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let stored = self.records.read().await;
        let mut hits = stored
            .iter()
            .map(|record| ScoredRecord {
                relevance: cosine_similarity(query_vector, &record.embedding),
                record: record.clone(),
            })
            .filter(|hit| hit.relevance >= min_relevance)
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| right.relevance.total_cmp(&left.relevance));
        hits.truncate(limit);
        Ok(hits)
    }
}

pub(crate) fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let (dot, left_norm, right_norm) = left.iter().zip(right).fold(
        (0f64, 0f64, 0f64),
        |(dot, left_norm, right_norm), (a, b)| {
            let (a, b) = (f64::from(*a), f64::from(*b));
            (dot + a * b, left_norm + a * a, right_norm + b * b)
        },
    );

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}
