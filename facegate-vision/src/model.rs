use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[allow(unused_imports)]
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub const DETECTOR_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Locations of the two ONNX models the pipeline needs.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Both models under `dir` with their upstream file names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detector: dir.join(DETECTOR_FILE),
            recognizer: dir.join(RECOGNIZER_FILE),
        }
    }

    pub fn exist(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    if !paths.detector.is_file() {
        anyhow::bail!("detector model not found at {}", paths.detector.display());
    }
    session_builder()?
        .commit_from_file(&paths.detector)
        .with_context(|| format!("load detector model {}", paths.detector.display()))
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    if !paths.recognizer.is_file() {
        anyhow::bail!("recognition model not found at {}", paths.recognizer.display());
    }
    session_builder()?
        .commit_from_file(&paths.recognizer)
        .with_context(|| format!("load recognition model {}", paths.recognizer.display()))
}
