//! Descriptor workers: stateless stages that turn a photo file into one
//! derived artifact each (EXIF record, thumbnail, semantic embedding,
//! face set).

pub mod embedding;
pub mod exif;
pub mod face;
mod onnx;
pub mod thumbnail;

pub use embedding::ClipEmbeddingWorker;
pub use exif::ExifWorker;
pub use face::{DetectedFace, FaceWorker};
pub use thumbnail::ThumbnailWorker;

use crate::db::PhotoRecord;
use crate::error::Result;

/// Capability every descriptor worker exposes. The pipeline preflights
/// `is_available` before scheduling a phase; an unavailable worker
/// skips its phase with a recorded, non-fatal error.
pub trait DescriptorWorker: Send + Sync {
    type Artifact;

    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn process(&self, photo: &PhotoRecord) -> Result<Self::Artifact>;
}
