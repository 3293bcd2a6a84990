use crate::config::{StoreBackend, StoreSettings, MAX_BATCH_OPS};
use crate::error::StoreError;
use crate::firestore::FirestoreStore;
use crate::product::{NaturalKey, ProductRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// A document collection addressed by explicit ids.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Natural keys of every stored document.
    async fn fetch_keys(&self) -> Result<Vec<NaturalKey>, StoreError>;

    async fn fetch_all(&self) -> Result<Vec<ProductRecord>, StoreError>;

    /// Writes all records atomically, each under its own `id`. An existing document with the
    /// same id is overwritten.
    async fn commit_batch(&self, records: &[ProductRecord]) -> Result<(), StoreError>;

    /// Removes every document, returning how many were deleted.
    async fn delete_all(&self) -> Result<usize, StoreError>;
}

pub fn check_batch_size(size: usize) -> Result<(), StoreError> {
    if size > MAX_BATCH_OPS {
        return Err(StoreError::BatchTooLarge {
            size,
            max: MAX_BATCH_OPS,
        });
    }
    Ok(())
}

pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn DocumentStore>, StoreError> {
    tracing::info!(backend = ?settings.backend, collection = %settings.collection, "Opening store");
    Ok(match settings.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::default()),
        StoreBackend::Json => Arc::new(JsonFileStore::new(settings.json_path.clone())),
        StoreBackend::Firestore => Arc::new(FirestoreStore::new(settings)?),
    })
}

#[derive(Debug, Default)]
struct MemoryInner {
    documents: BTreeMap<String, ProductRecord>,
    commits: Vec<usize>,
    fail_commits: bool,
}

/// In-process store; also records the size of every commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn with_records(records: impl IntoIterator<Item = ProductRecord>) -> Self {
        let store = Self::default();
        {
            let mut inner = store.lock();
            for record in records {
                inner.documents.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Makes every subsequent commit fail.
    pub fn fail_commits(&self) {
        self.lock().fail_commits = true;
    }

    pub fn commit_sizes(&self) -> Vec<usize> {
        self.lock().commits.clone()
    }

    pub fn documents(&self) -> Vec<ProductRecord> {
        self.lock().documents.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_keys(&self) -> Result<Vec<NaturalKey>, StoreError> {
        Ok(self
            .lock()
            .documents
            .values()
            .map(ProductRecord::natural_key)
            .collect())
    }

    async fn fetch_all(&self) -> Result<Vec<ProductRecord>, StoreError> {
        Ok(self.documents())
    }

    async fn commit_batch(&self, records: &[ProductRecord]) -> Result<(), StoreError> {
        check_batch_size(records.len())?;
        let mut inner = self.lock();
        if inner.fail_commits {
            return Err(StoreError::Rejected {
                status: 503,
                body: "commit refused".to_string(),
            });
        }
        for record in records {
            inner.documents.insert(record.id.clone(), record.clone());
        }
        inner.commits.push(records.len());
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let count = inner.documents.len();
        inner.documents.clear();
        Ok(count)
    }
}

/// A collection kept as one JSON object `{ id: document }` on disk.
///
/// Commits write a sibling temp file and rename it over the original, so a batch
/// lands entirely or not at all.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, ProductRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, documents: &BTreeMap<String, ProductRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(documents)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn fetch_keys(&self) -> Result<Vec<NaturalKey>, StoreError> {
        Ok(self
            .load()
            .await?
            .values()
            .map(ProductRecord::natural_key)
            .collect())
    }

    async fn fetch_all(&self) -> Result<Vec<ProductRecord>, StoreError> {
        Ok(self.load().await?.into_values().collect())
    }

    #[instrument(skip(self, records), fields(path = %self.path.display(), batch = records.len()))]
    async fn commit_batch(&self, records: &[ProductRecord]) -> Result<(), StoreError> {
        check_batch_size(records.len())?;
        let _guard = self.write_lock.lock().await;
        let mut documents = self.load().await?;
        for record in records {
            documents.insert(record.id.clone(), record.clone());
        }
        self.replace(&documents).await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let documents = self.load().await?;
        if !documents.is_empty() {
            self.replace(&BTreeMap::new()).await?;
        }
        Ok(documents.len())
    }
}
