use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ENCODER_INPUT};
use crate::model::{self, ModelPaths};

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }

    /// Highest scoring detection, or `None` when the image has no face.
    pub fn detect_best(&mut self, img: &DynamicImage) -> Result<Option<Detection>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        Ok(detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score)))
    }

    /// Detect the best face and encode it. `Ok(None)` means no face was found.
    pub fn process_image(&mut self, img: &DynamicImage) -> Result<Option<(Detection, Embedding)>> {
        let Some(best) = self.detect_best(img)? else {
            return Ok(None);
        };

        let aligned = face::align_face(img, &best, ENCODER_INPUT).context("aligning face")?;
        let embedding = face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;

        Ok(Some((best, embedding)))
    }

    pub fn extract_embedding(&mut self, img: &DynamicImage) -> Result<Option<Embedding>> {
        Ok(self.process_image(img)?.map(|(_, embedding)| embedding))
    }
}
