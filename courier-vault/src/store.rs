//! Durable job storage backends.

use crate::error::{VaultError, VaultResult};
use crate::job::{Job, JobId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Storage of serialized jobs ordered by not-before time.
///
/// Implementations must be safe to call from any task. `post` must be
/// durable before it returns.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Not-before time of the earliest job, or `None` when empty.
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>>;

    /// Store a job description.
    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId>;

    /// Remove and return the earliest job if it is due at `now`.
    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>>;

    /// Number of stored jobs.
    async fn len(&self) -> VaultResult<usize>;

    /// Whether the store is empty.
    async fn is_empty(&self) -> VaultResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove every job.
    async fn clear(&self) -> VaultResult<()>;
}

type IndexKey = (Timestamp, u64);

/// Jobs ordered by `(not_before, insertion sequence)`.
#[derive(Debug, Default)]
struct JobIndex {
    jobs: BTreeMap<IndexKey, Job>,
    next_seq: u64,
}

impl JobIndex {
    fn insert(&mut self, job: Job) -> IndexKey {
        let key = (job.not_before, self.next_seq);
        self.next_seq += 1;
        self.jobs.insert(key, job);
        key
    }

    fn restore(&mut self, key: IndexKey, job: Job) {
        self.jobs.insert(key, job);
    }

    fn remove(&mut self, key: &IndexKey) -> Option<Job> {
        self.jobs.remove(key)
    }

    fn peek(&self) -> Option<Timestamp> {
        self.jobs.keys().next().map(|(not_before, _)| *not_before)
    }

    fn pop_due(&mut self, now: Timestamp) -> Option<(IndexKey, Job)> {
        let key = *self.jobs.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.jobs.remove(&key).map(|job| (key, job))
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }

    fn clear(&mut self) {
        self.jobs.clear();
    }

    fn ordered(&self) -> Vec<&Job> {
        self.jobs.values().collect()
    }
}

/// In-memory job store.
///
/// Nothing survives the process. Useful for tests and for hosts that
/// provide durability elsewhere.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    index: Mutex<JobIndex>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored jobs in dispatch order.
    pub async fn jobs(&self) -> Vec<Job> {
        self.index.lock().await.ordered().into_iter().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        Ok(self.index.lock().await.peek())
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        let job = Job::new(description, not_before);
        let id = job.id;
        self.index.lock().await.insert(job);
        Ok(id)
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        Ok(self.index.lock().await.pop_due(now).map(|(_, job)| job))
    }

    async fn len(&self) -> VaultResult<usize> {
        Ok(self.index.lock().await.len())
    }

    async fn clear(&self) -> VaultResult<()> {
        self.index.lock().await.clear();
        Ok(())
    }
}

const STORE_FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    jobs: Vec<&'a Job>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Job store persisted to a single JSON file.
///
/// Every mutation rewrites the file through a temporary sibling that is
/// synced to disk and then renamed, so a crash or power loss leaves either
/// the old or the new contents.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    index: Mutex<JobIndex>,
}

impl FileJobStore {
    /// Open a store, loading existing jobs. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> VaultResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                VaultError::Store(format!(
                    "Failed to create store directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let mut index = JobIndex::default();
        match fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)
                    .map_err(|e| VaultError::Deserialization(e.to_string()))?;
                if file.version != STORE_FILE_VERSION {
                    return Err(VaultError::Store(format!(
                        "Unsupported store file version: {}",
                        file.version
                    )));
                }
                for job in file.jobs {
                    index.insert(job);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = ?path, jobs = index.len(), "Opened job store");

        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, index: &JobIndex) -> VaultResult<()> {
        let document = StoreFileRef {
            version: STORE_FILE_VERSION,
            jobs: index.ordered(),
        };
        let bytes =
            serde_json::to_vec(&document).map_err(|e| VaultError::Serialization(e.to_string()))?;

        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;
        debug!(path = ?self.path, jobs = index.len(), "Persisted job store");
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        Ok(self.index.lock().await.peek())
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        let job = Job::new(description, not_before);
        let id = job.id;

        let mut index = self.index.lock().await;
        let key = index.insert(job);
        if let Err(e) = self.persist(&index).await {
            index.remove(&key);
            return Err(e);
        }
        Ok(id)
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        let mut index = self.index.lock().await;
        let Some((key, job)) = index.pop_due(now) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&index).await {
            index.restore(key, job);
            return Err(e);
        }
        Ok(Some(job))
    }

    async fn len(&self) -> VaultResult<usize> {
        Ok(self.index.lock().await.len())
    }

    async fn clear(&self) -> VaultResult<()> {
        let mut index = self.index.lock().await;
        index.clear();
        self.persist(&index).await
    }
}
