use crate::error::StoreError;
use crate::product::ProductRecord;
use crate::store::DocumentStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Buffers accepted records and commits them in fixed-size atomic batches.
pub struct BatchWriter {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    buffer: Vec<ProductRecord>,
    committed: usize,
    batches: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            committed: 0,
            batches: 0,
        }
    }

    /// Buffers `record`, committing the buffer once it reaches the batch size.
    pub async fn push(&mut self, record: ProductRecord) -> Result<(), StoreError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commits whatever is buffered. A failed batch is logged in full and not retried.
    #[instrument(skip(self), fields(batch = self.buffer.len(), committed = self.committed))]
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let batch = std::mem::take(&mut self.buffer);

        let unique: HashSet<&str> = batch.iter().map(|r| r.id.as_str()).collect();
        if unique.len() != batch.len() {
            tracing::warn!(
                ids = batch.len(),
                unique = unique.len(),
                "Duplicate ids in batch; later documents will overwrite earlier ones"
            );
        }

        for (i, record) in batch.iter().enumerate() {
            tracing::debug!(
                position = i + 1,
                of = batch.len(),
                id = %record.id,
                name = %record.name,
                "Adding to batch"
            );
        }

        match self.store.commit_batch(&batch).await {
            Ok(()) => {
                self.committed += batch.len();
                self.batches += 1;
                tracing::info!(
                    saved = batch.len(),
                    total = self.committed,
                    duration = ?start.elapsed(),
                    "Committed batch"
                );
                Ok(())
            }
            Err(e) => {
                let failed: Vec<(&str, &str)> = batch
                    .iter()
                    .map(|r| (r.id.as_str(), r.name.as_str()))
                    .collect();
                tracing::error!(error = %e, records = ?failed, "Batch commit failed");
                Err(e)
            }
        }
    }

    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
