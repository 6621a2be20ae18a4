use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;

use crate::error::{FaceError, Result};
use crate::events::{EventLog, VerificationEvent};
use crate::matcher::{format_confidence, MatchOutcome, MatchResult, Matcher};
use crate::photo::{DecodeFailure, Photo};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::storage::{AppendPolicy, VectorStore};

/// What a caller sees for each request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Registered { nim: String, name: String, count: usize },
    Added { nim: String, count: usize },
    Verified(MatchResult),
    RejectedNoFace,
    RejectedNotRecognized,
    Error { kind: String, detail: String },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

impl From<FaceError> for Outcome {
    fn from(err: FaceError) -> Self {
        Outcome::Error {
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_users: usize,
    pub total_embeddings: usize,
    pub total_logs: usize,
    pub logs: Vec<VerificationEvent>,
}

/// Why a single photo of a batch was skipped.
#[derive(Debug, thiserror::Error)]
enum PhotoError {
    #[error(transparent)]
    Decode(#[from] DecodeFailure),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Enrollment and verification over injected collaborators.
pub struct FaceService {
    store: Arc<VectorStore>,
    events: Arc<dyn EventLog>,
    provider: Arc<dyn EmbeddingProvider>,
    matcher: Matcher,
}

impl FaceService {
    pub fn new(
        store: Arc<VectorStore>,
        events: Arc<dyn EventLog>,
        provider: Arc<dyn EmbeddingProvider>,
        matcher: Matcher,
    ) -> Self {
        Self {
            store,
            events,
            provider,
            matcher,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn embed(&self, photo: &Photo) -> std::result::Result<Vec<f32>, PhotoError> {
        let image = photo.decode()?;
        Ok(self.provider.embed(&image)?)
    }

    /// Embed every usable photo. Unusable ones are skipped; only an
    /// all-skipped batch is an error.
    fn embed_batch(&self, nim: &str, photos: &[Photo]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(photos.len());
        for (i, photo) in photos.iter().enumerate() {
            match self.embed(photo) {
                Ok(v) => vectors.push(v),
                Err(e) => warn!("{nim}: skipping photo {}: {e:#}", i + 1),
            }
        }
        if vectors.is_empty() {
            return Err(FaceError::NoFaceDetected);
        }
        Ok(vectors)
    }

    /// Create or rename `nim` and append one embedding per usable photo.
    /// Existing embeddings are kept.
    pub fn register(&self, nim: &str, name: &str, photos: &[Photo]) -> Result<Outcome> {
        let (nim, name) = (nim.trim(), name.trim());
        if nim.is_empty() || name.is_empty() || photos.is_empty() {
            return Err(FaceError::InvalidInput(
                "nim, name and at least one photo are required".to_string(),
            ));
        }

        let vectors = self.embed_batch(nim, photos)?;
        let count = self.store.append_embeddings(
            nim,
            vectors,
            AppendPolicy::CreateWithName(name.to_string()),
        )?;
        info!("Registered {name} ({nim}) with {count} photo(s)");

        Ok(Outcome::Registered {
            nim: nim.to_string(),
            name: name.to_string(),
            count,
        })
    }

    /// Append photos to an already registered `nim`.
    pub fn add_photos(&self, nim: &str, photos: &[Photo]) -> Result<Outcome> {
        let nim = nim.trim();
        if nim.is_empty() || photos.is_empty() {
            return Err(FaceError::InvalidInput(
                "nim and at least one photo are required".to_string(),
            ));
        }
        // fail before inference; the append re-checks atomically
        if self.store.name_of(nim).is_none() {
            return Err(FaceError::IdentityNotFound(nim.to_string()));
        }

        let vectors = self.embed_batch(nim, photos)?;
        let count = self
            .store
            .append_embeddings(nim, vectors, AppendPolicy::RequireExisting)?;
        info!("Added {count} photo(s) to {nim}");

        Ok(Outcome::Added {
            nim: nim.to_string(),
            count,
        })
    }

    /// Match one probe photo against every stored embedding.
    pub fn verify(&self, photo: &Photo) -> Result<Outcome> {
        let image = photo
            .decode()
            .map_err(|e| FaceError::InvalidInput(e.to_string()))?;

        let probe = match self.provider.embed(&image) {
            Ok(v) => v,
            Err(ProviderError::NoFace) => return Ok(Outcome::RejectedNoFace),
            Err(ProviderError::Failed(e)) => {
                warn!("embedding probe failed: {e:#}");
                return Ok(Outcome::RejectedNoFace);
            }
        };

        let snapshot = self.store.snapshot();
        match self.matcher.best_match(&snapshot, &probe)? {
            MatchOutcome::Matched(result) => {
                let result = result.rounded();
                info!(
                    "Verified {} ({}) distance {:.4} confidence {}",
                    result.name,
                    result.nim,
                    result.distance,
                    format_confidence(result.confidence)
                );
                self.log_event(&result);
                Ok(Outcome::Verified(result))
            }
            MatchOutcome::Unrecognized { best_distance } => {
                info!("Face not recognized (closest distance {best_distance:?})");
                Ok(Outcome::RejectedNotRecognized)
            }
        }
    }

    fn log_event(&self, result: &MatchResult) {
        let event = VerificationEvent {
            nim: result.nim.clone(),
            name: result.name.clone(),
            model: self.provider.model_name().to_string(),
            distance: result.distance,
            confidence: result.confidence,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.events.record(&event) {
            error!("failed to record verification of {}: {e:#}", result.nim);
        }
    }

    /// Counts plus the `limit` most recent verifications.
    pub fn dashboard(&self, limit: usize) -> Result<Dashboard> {
        let snapshot = self.store.snapshot();
        Ok(Dashboard {
            total_users: snapshot.count_identities(),
            total_embeddings: snapshot.count_embeddings(),
            total_logs: self.events.count().map_err(|e| FaceError::storage(format!("{e:#}")))?,
            logs: self
                .events
                .recent(limit)
                .map_err(|e| FaceError::storage(format!("{e:#}")))?,
        })
    }
}
