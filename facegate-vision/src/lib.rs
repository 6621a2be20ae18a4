//! Face detection and embedding for facegate.
//!
//! The pipeline runs YuNet to find the most confident face, aligns it on the
//! eye landmarks and encodes it with SFace into an L2-normalised vector.

pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

pub use face::{Detection, Embedding};
pub use model::ModelPaths;
pub use pipeline::Pipeline;
