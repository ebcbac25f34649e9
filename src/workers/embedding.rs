//! Semantic embedding worker: CLIP ViT-B/32 through ONNX Runtime,
//! producing 512-dim L2-normalized vectors in a shared image/text
//! space.
//!
//! Image inputs follow the CLIP preprocessing recipe: resize to the
//! 224px model edge, scale bytes to [0, 1], then standardize per
//! channel with the recipe's statistics. Text goes through a stand-in
//! tokenizer into the model's 77-slot context window.

use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use super::onnx::{self, ModelSpec};
use super::DescriptorWorker;
use crate::db::embeddings::normalize;
use crate::db::PhotoRecord;
use crate::error::{Error, Result};

/// Dimension of the shared image/text embedding space.
pub const EMBEDDING_DIM: usize = 512;
/// Stored with every embedding row; a model upgrade changes this and
/// triggers a full re-embed.
pub const MODEL_NAME: &str = "clip-vit-b32";

/// Model input edge for ViT-B/32.
const CLIP_EDGE: u32 = 224;
/// Per-channel statistics from the CLIP preprocessing recipe.
const CHANNEL_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CHANNEL_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// Text context window and its delimiter tokens.
const CONTEXT_LEN: usize = 77;
const BOS_TOKEN: i64 = 49406;
const EOS_TOKEN: i64 = 49407;

const VISUAL_SPEC: ModelSpec = ModelSpec {
    file: "clip-vit-b32-visual.onnx",
    url: "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx",
};

const TEXT_SPEC: ModelSpec = ModelSpec {
    file: "clip-vit-b32-text.onnx",
    url: "https://huggingface.co/Qdrant/clip-ViT-B-32-text/resolve/main/model.onnx",
};

pub struct ClipEmbeddingWorker {
    models_dir: PathBuf,
    visual: Mutex<Option<Session>>,
    text: Mutex<Option<Session>>,
    /// First-probe verdict, cached so a broken runtime is not retried
    /// for every photo in a run.
    availability: OnceLock<bool>,
}

impl ClipEmbeddingWorker {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            visual: Mutex::new(None),
            text: Mutex::new(None),
            availability: OnceLock::new(),
        }
    }

    /// Generate an embedding for an image file.
    pub fn embed_image_file(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)
            .map_err(|e| Error::Invalid(format!("cannot decode {}: {e}", path.display())))?;
        self.embed_image(&img)
    }

    /// Generate an embedding for a decoded image.
    pub fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let planes = onnx::scaled_planes(img, CLIP_EDGE, CLIP_EDGE, |channel, value| {
            (value as f32 / 255.0 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel]
        });

        let raw = onnx::with_session(&self.visual, &self.models_dir, &VISUAL_SPEC, |session| {
            let edge = CLIP_EDGE as usize;
            let tensor = Tensor::from_array(([1usize, 3, edge, edge], planes.into_boxed_slice()))
                .map_err(Error::storage)?;
            let outputs = session
                .run(ort::inputs!["pixel_values" => tensor])
                .map_err(Error::storage)?;
            let (_, value) = outputs
                .iter()
                .next()
                .ok_or_else(|| Error::Unavailable("visual model produced no outputs".to_string()))?;
            let (_, data) = value.try_extract_tensor::<f32>().map_err(Error::storage)?;
            Ok(data.to_vec())
        })?;
        normalize(&raw)
    }

    /// Generate an embedding for text (text-to-image search).
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let ids = token_window(text);

        let raw = onnx::with_session(&self.text, &self.models_dir, &TEXT_SPEC, |session| {
            let tensor = Tensor::from_array(([1usize, CONTEXT_LEN], ids.into_boxed_slice()))
                .map_err(Error::storage)?;
            let outputs = session
                .run(ort::inputs!["input_ids" => tensor])
                .map_err(Error::storage)?;
            let (_, value) = outputs
                .iter()
                .next()
                .ok_or_else(|| Error::Unavailable("text model produced no outputs".to_string()))?;
            let (_, data) = value.try_extract_tensor::<f32>().map_err(Error::storage)?;
            Ok(data.to_vec())
        })?;
        normalize(&raw)
    }
}

impl DescriptorWorker for ClipEmbeddingWorker {
    type Artifact = Vec<f32>;

    fn name(&self) -> &'static str {
        "embedding"
    }

    fn is_available(&self) -> bool {
        *self.availability.get_or_init(|| {
            onnx::with_session(&self.visual, &self.models_dir, &VISUAL_SPEC, |_| Ok(())).is_ok()
        })
    }

    fn process(&self, photo: &PhotoRecord) -> Result<Vec<f32>> {
        self.embed_image_file(Path::new(&photo.path))
    }
}

/// Stand-in tokenizer: each whitespace-separated word hashes to a
/// stable id inside the vocabulary, framed by the BOS/EOS delimiters
/// and zero-padded to the context window. Identical prompts always
/// produce identical sequences, which is all retrieval needs from a
/// placeholder.
fn token_window(text: &str) -> Vec<i64> {
    let mut ids = Vec::with_capacity(CONTEXT_LEN);
    ids.push(BOS_TOKEN);
    for word in text.split_whitespace().take(CONTEXT_LEN - 2) {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        // Offset away from the low control-token range.
        ids.push((hasher.finish() % 40_000) as i64 + 1_000);
    }
    ids.push(EOS_TOKEN);
    ids.resize(CONTEXT_LEN, 0);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_token_window_shape() {
        let ids = token_window("golden retriever on a beach");
        assert_eq!(ids.len(), CONTEXT_LEN);
        assert_eq!(ids[0], BOS_TOKEN);
        assert_eq!(ids[6], EOS_TOKEN);
        assert_eq!(ids[7], 0);
        // Deterministic for identical prompts.
        assert_eq!(ids, token_window("golden retriever on a beach"));
    }

    #[test]
    fn test_token_window_truncates_long_prompts() {
        let prompt = vec!["word"; 300].join(" ");
        let ids = token_window(&prompt);
        assert_eq!(ids.len(), CONTEXT_LEN);
        assert_eq!(*ids.last().unwrap(), EOS_TOKEN);
    }

    #[test]
    fn test_image_standardization() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([255, 0, 128])));
        let planes = onnx::scaled_planes(&img, CLIP_EDGE, CLIP_EDGE, |channel, value| {
            (value as f32 / 255.0 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel]
        });
        let area = (CLIP_EDGE * CLIP_EDGE) as usize;
        assert_eq!(planes.len(), 3 * area);

        let red = (1.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        assert!((planes[0] - red).abs() < 1e-2);
        let green = (0.0 - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        assert!((planes[area] - green).abs() < 1e-2);
    }
}
