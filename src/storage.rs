use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::distance::check_embedding;
use crate::error::{FaceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub id: Uuid,
    pub vector: Vec<f32>,
}

/// One enrolled identity. Every photo keeps its own embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub name: String,
    pub embeddings: Vec<StoredEmbedding>,
}

/// A borrowed view of one stored embedding.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub nim: &'a str,
    pub name: &'a str,
    pub vector: &'a [f32],
}

/// Full store contents. Identities iterate in ascending key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    /// Fixed by the first stored embedding.
    pub dimension: Option<usize>,
    pub identities: BTreeMap<String, EnrollmentRecord>,
}

impl StoreData {
    /// One entry per stored embedding, ordered by identity key and then by
    /// insertion order within an identity.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.identities.iter().flat_map(|(nim, record)| {
            record.embeddings.iter().map(move |e| Entry {
                nim,
                name: &record.name,
                vector: &e.vector,
            })
        })
    }

    pub fn count_identities(&self) -> usize {
        self.identities.len()
    }

    pub fn count_embeddings(&self) -> usize {
        self.identities.values().map(|r| r.embeddings.len()).sum()
    }
}

/// Durable home of the store. `load` runs once at startup, `save` after
/// every mutation.
pub trait StoreBackend: Send + Sync {
    fn load(&self) -> anyhow::Result<StoreData>;
    fn save(&self, data: &StoreData) -> anyhow::Result<()>;
}

/// postcard-encoded snapshot in a single file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> anyhow::Result<StoreData> {
        if !self.path.exists() {
            return Ok(StoreData::default());
        }
        let data = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        postcard::from_bytes(&data).with_context(|| format!("decoding {}", self.path.display()))
    }

    fn save(&self, data: &StoreData) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = postcard::to_allocvec(data)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// No durability. Starts empty every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl StoreBackend for MemoryBackend {
    fn load(&self) -> anyhow::Result<StoreData> {
        Ok(StoreData::default())
    }

    fn save(&self, _data: &StoreData) -> anyhow::Result<()> {
        Ok(())
    }
}

/// How [`VectorStore::append_embeddings`] treats an unknown identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendPolicy {
    /// Add-photos path: the identity must already be registered.
    RequireExisting,
    /// Registration path: upsert the name, then append.
    CreateWithName(String),
}

/// Embedding store with copy-on-write snapshots.
///
/// Readers take an `Arc` of the current snapshot and scan it without holding
/// any lock. Writers serialise on `writer`, persist the next snapshot and
/// only then publish it, so a failed save leaves the store unchanged and a
/// slow save never blocks readers.
pub struct VectorStore {
    current: RwLock<Arc<StoreData>>,
    writer: Mutex<()>,
    backend: Box<dyn StoreBackend>,
}

impl VectorStore {
    /// Load-or-empty initialisation.
    pub fn open(backend: impl StoreBackend + 'static) -> Result<Self> {
        let data = backend.load().map_err(|e| FaceError::storage(format!("{e:#}")))?;
        info!(
            "Loaded {} identities with {} embeddings",
            data.count_identities(),
            data.count_embeddings()
        );
        Ok(Self {
            current: RwLock::new(Arc::new(data)),
            writer: Mutex::new(()),
            backend: Box::new(backend),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(StoreData::default())),
            writer: Mutex::new(()),
            backend: Box::new(MemoryBackend),
        }
    }

    /// Consistent view of the whole store.
    pub fn snapshot(&self) -> Arc<StoreData> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = StoreData::clone(&self.snapshot());
        let out = f(&mut next)?;
        self.backend
            .save(&next)
            .map_err(|e| FaceError::storage(format!("{e:#}")))?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }

    /// Insert `nim` or rename it. Existing embeddings are kept.
    pub fn upsert_identity(&self, nim: &str, name: &str) -> Result<()> {
        if self
            .snapshot()
            .identities
            .get(nim)
            .is_some_and(|r| r.name == name)
        {
            return Ok(());
        }
        self.mutate(|data| {
            upsert(data, nim, name);
            Ok(())
        })
    }

    /// Append `vectors` to `nim` in one atomic mutation and return how many
    /// were stored. Every vector must match the store dimension.
    pub fn append_embeddings(
        &self,
        nim: &str,
        vectors: Vec<Vec<f32>>,
        policy: AppendPolicy,
    ) -> Result<usize> {
        self.mutate(|data| {
            let dimension = check_batch(data.dimension, &vectors)?;

            let record = match &policy {
                AppendPolicy::RequireExisting => data
                    .identities
                    .get_mut(nim)
                    .ok_or_else(|| FaceError::IdentityNotFound(nim.to_string()))?,
                AppendPolicy::CreateWithName(name) => upsert(data, nim, name),
            };

            let count = vectors.len();
            record.embeddings.extend(vectors.into_iter().map(|vector| StoredEmbedding {
                id: Uuid::new_v4(),
                vector,
            }));
            debug!("{nim}: +{count} embeddings, {} total", record.embeddings.len());

            if dimension.is_some() {
                data.dimension = dimension;
            }
            Ok(count)
        })
    }

    /// Owned `(nim, name, vector)` per stored embedding.
    pub fn all_entries(&self) -> Vec<(String, String, Vec<f32>)> {
        self.snapshot()
            .entries()
            .map(|e| (e.nim.to_string(), e.name.to_string(), e.vector.to_vec()))
            .collect()
    }

    pub fn name_of(&self, nim: &str) -> Option<String> {
        self.snapshot().identities.get(nim).map(|r| r.name.clone())
    }

    pub fn embeddings_for(&self, nim: &str) -> usize {
        self.snapshot()
            .identities
            .get(nim)
            .map_or(0, |r| r.embeddings.len())
    }

    pub fn count_identities(&self) -> usize {
        self.snapshot().count_identities()
    }

    pub fn count_embeddings(&self) -> usize {
        self.snapshot().count_embeddings()
    }
}

fn upsert<'a>(data: &'a mut StoreData, nim: &str, name: &str) -> &'a mut EnrollmentRecord {
    let record = data
        .identities
        .entry(nim.to_string())
        .or_insert_with(|| EnrollmentRecord {
            name: name.to_string(),
            embeddings: Vec::new(),
        });
    if record.name != name {
        record.name = name.to_string();
    }
    record
}

/// The dimension every vector in the batch shares, checked against the
/// store's. Zero-norm and non-finite vectors are refused so one bad photo
/// cannot poison every later scan. `current` for an empty batch.
fn check_batch(current: Option<usize>, vectors: &[Vec<f32>]) -> Result<Option<usize>> {
    let Some(first) = vectors.first() else {
        return Ok(current);
    };
    let expected = current.unwrap_or(first.len());
    if expected == 0 {
        return Err(FaceError::InvalidInput("empty embedding vector".to_string()));
    }
    for v in vectors {
        if v.len() != expected {
            return Err(FaceError::DimensionMismatch {
                expected,
                actual: v.len(),
            });
        }
        check_embedding(v)?;
    }
    Ok(Some(expected))
}
