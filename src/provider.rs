use std::sync::{Mutex, PoisonError};

use facegate_vision::{ModelPaths, Pipeline};
use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no face detected")]
    NoFace,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Turns one photo into a fixed-length embedding.
///
/// Implementations must always produce vectors of the same length; vectors
/// from different models are not comparable.
pub trait EmbeddingProvider: Send + Sync {
    /// Recorded with every verification event.
    fn model_name(&self) -> &str;

    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, ProviderError>;
}

/// YuNet + SFace through ONNX Runtime.
///
/// Sessions need exclusive access, so concurrent callers queue on the
/// pipeline. No store lock is held while they wait.
pub struct OnnxProvider {
    pipeline: Mutex<Pipeline>,
    model_name: String,
}

impl OnnxProvider {
    pub const MODEL_NAME: &'static str = "SFace";

    pub fn new(paths: &ModelPaths, score_threshold: f32, nms_threshold: f32) -> anyhow::Result<Self> {
        let pipeline = Pipeline::new(paths)?.with_thresholds(score_threshold, nms_threshold);
        Ok(Self {
            pipeline: Mutex::new(pipeline),
            model_name: Self::MODEL_NAME.to_string(),
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, ProviderError> {
        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        match pipeline.extract_embedding(image)? {
            Some(embedding) => Ok(embedding.into_vec()),
            None => Err(ProviderError::NoFace),
        }
    }
}
