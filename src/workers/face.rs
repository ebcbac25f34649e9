//! Face worker: detection and per-face 512-dim embeddings over ONNX
//! Runtime. Each photo yields zero or more faces, each with a bounding
//! box in source-pixel coordinates, a detection confidence, and an
//! embedding for identity matching. Only constructed when face search
//! is enabled.

use image::{DynamicImage, GenericImageView};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use super::onnx::{self, ModelSpec};
use super::DescriptorWorker;
use crate::db::embeddings::normalize;
use crate::db::{BoundingBox, PhotoRecord};
use crate::error::{Error, Result};

/// A detected face with bounding box, embedding, and confidence.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// Detector input size (UltraFace RFB-320).
const DETECT_WIDTH: u32 = 320;
const DETECT_HEIGHT: u32 = 240;
/// Embedder input edge (ArcFace).
const EMBED_EDGE: u32 = 112;

/// Detections below this confidence are discarded.
const MIN_CONFIDENCE: f32 = 0.65;
/// Overlap fraction above which the weaker of two detections is
/// suppressed.
const MAX_OVERLAP: f32 = 0.35;
/// Margin added around a detection before cropping for embedding, as a
/// fraction of the box size.
const CROP_MARGIN: f32 = 0.25;

const DETECT_SPEC: ModelSpec = ModelSpec {
    file: "ultraface-rfb-320.onnx",
    url: "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
};

const EMBED_SPEC: ModelSpec = ModelSpec {
    file: "arcface-r100.onnx",
    url: "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx",
};

pub struct FaceWorker {
    models_dir: PathBuf,
    detector: Mutex<Option<Session>>,
    embedder: Mutex<Option<Session>>,
    availability: OnceLock<bool>,
}

impl FaceWorker {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            detector: Mutex::new(None),
            embedder: Mutex::new(None),
            availability: OnceLock::new(),
        }
    }

    pub fn detect(&self, path: &Path) -> Result<Vec<DetectedFace>> {
        let img = image::open(path)
            .map_err(|e| Error::Invalid(format!("cannot decode {}: {e}", path.display())))?;
        self.detect_in_image(&img)
    }

    /// Detect over a batch. Per-item failures produce an error entry
    /// and an empty face list; the batch never aborts.
    pub fn detect_batch<'a>(
        &self,
        photos: &'a [PhotoRecord],
    ) -> Vec<(&'a PhotoRecord, Result<Vec<DetectedFace>>)> {
        photos
            .iter()
            .map(|photo| (photo, self.detect(Path::new(&photo.path))))
            .collect()
    }

    fn detect_in_image(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let detections = self.detect_boxes(img)?;

        let mut faces = Vec::with_capacity(detections.len());
        for (bbox, confidence) in detections {
            let crop = face_region(img, &bbox);
            let embedding = self.embed_face(&crop)?;
            faces.push(DetectedFace {
                bbox,
                embedding,
                confidence,
            });
        }
        Ok(faces)
    }

    /// Run the detector and map its normalized box coordinates back to
    /// source pixels.
    fn detect_boxes(&self, img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>> {
        // Detector normalization: center bytes on 127 with a 128 scale.
        let planes = onnx::scaled_planes(img, DETECT_WIDTH, DETECT_HEIGHT, |_, value| {
            (value as f32 - 127.0) / 128.0
        });
        let (source_w, source_h) = (img.width() as f32, img.height() as f32);

        onnx::with_session(&self.detector, &self.models_dir, &DETECT_SPEC, |session| {
            let tensor = Tensor::from_array((
                [1usize, 3, DETECT_HEIGHT as usize, DETECT_WIDTH as usize],
                planes.into_boxed_slice(),
            ))
            .map_err(Error::storage)?;
            let outputs = session
                .run(ort::inputs!["input" => tensor])
                .map_err(Error::storage)?;

            // Detector outputs: per-anchor (background, face) scores
            // and normalized (x1, y1, x2, y2) boxes.
            let scores_value = outputs
                .get("scores")
                .ok_or_else(|| Error::Unavailable("detector produced no scores".to_string()))?;
            let boxes_value = outputs
                .get("boxes")
                .ok_or_else(|| Error::Unavailable("detector produced no boxes".to_string()))?;
            let (_, scores) = scores_value
                .try_extract_tensor::<f32>()
                .map_err(Error::storage)?;
            let (_, coords) = boxes_value
                .try_extract_tensor::<f32>()
                .map_err(Error::storage)?;

            let mut candidates = Vec::new();
            for (pair, quad) in scores.chunks_exact(2).zip(coords.chunks_exact(4)) {
                let confidence = pair[1];
                if confidence < MIN_CONFIDENCE {
                    continue;
                }
                let bbox = BoundingBox {
                    x1: quad[0].clamp(0.0, 1.0) * source_w,
                    y1: quad[1].clamp(0.0, 1.0) * source_h,
                    x2: quad[2].clamp(0.0, 1.0) * source_w,
                    y2: quad[3].clamp(0.0, 1.0) * source_h,
                };
                if bbox.width() > 0.0 && bbox.height() > 0.0 {
                    candidates.push((bbox, confidence));
                }
            }

            Ok(suppress_overlaps(candidates, MAX_OVERLAP))
        })
    }

    fn embed_face(&self, crop: &DynamicImage) -> Result<Vec<f32>> {
        // Embedder normalization: bytes remapped to [-1, 1].
        let planes = onnx::scaled_planes(crop, EMBED_EDGE, EMBED_EDGE, |_, value| {
            (value as f32 - 127.5) / 127.5
        });

        let raw = onnx::with_session(&self.embedder, &self.models_dir, &EMBED_SPEC, |session| {
            let edge = EMBED_EDGE as usize;
            let tensor = Tensor::from_array(([1usize, 3, edge, edge], planes.into_boxed_slice()))
                .map_err(Error::storage)?;
            let outputs = session
                .run(ort::inputs!["data" => tensor])
                .map_err(Error::storage)?;
            let (_, value) = outputs
                .iter()
                .next()
                .ok_or_else(|| Error::Unavailable("embedder produced no outputs".to_string()))?;
            let (_, data) = value.try_extract_tensor::<f32>().map_err(Error::storage)?;
            Ok(data.to_vec())
        })?;
        normalize(&raw)
    }
}

impl DescriptorWorker for FaceWorker {
    type Artifact = Vec<DetectedFace>;

    fn name(&self) -> &'static str {
        "face"
    }

    fn is_available(&self) -> bool {
        *self.availability.get_or_init(|| {
            onnx::with_session(&self.detector, &self.models_dir, &DETECT_SPEC, |_| Ok(())).is_ok()
                && onnx::with_session(&self.embedder, &self.models_dir, &EMBED_SPEC, |_| Ok(()))
                    .is_ok()
        })
    }

    fn process(&self, photo: &PhotoRecord) -> Result<Vec<DetectedFace>> {
        self.detect(Path::new(&photo.path))
    }
}

/// Keep the strongest detection in each overlapping group: candidates
/// are visited best-first and kept only if they clear every already
/// kept box.
fn suppress_overlaps(
    mut candidates: Vec<(BoundingBox, f32)>,
    max_overlap: f32,
) -> Vec<(BoundingBox, f32)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|(winner, _)| iou(winner, &candidate.0) <= max_overlap)
        {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection over union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let overlap_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let overlap = overlap_w * overlap_h;
    let union = a.area() + b.area() - overlap;
    if union <= 0.0 {
        0.0
    } else {
        overlap / union
    }
}

/// Expand a detection by the crop margin and clamp to the image before
/// handing it to the embedder.
fn face_region(img: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (img_w, img_h) = (img.width() as f32, img.height() as f32);
    let pad_x = bbox.width() * CROP_MARGIN;
    let pad_y = bbox.height() * CROP_MARGIN;

    let x1 = (bbox.x1 - pad_x).clamp(0.0, img_w - 1.0);
    let y1 = (bbox.y1 - pad_y).clamp(0.0, img_h - 1.0);
    let x2 = (bbox.x2 + pad_x).clamp(x1 + 1.0, img_w);
    let y2 = (bbox.y2 + pad_y).clamp(y1 + 1.0, img_h);

    img.crop_imm(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    #[test]
    fn test_iou_extremes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);

        let far = bbox(50.0, 50.0, 60.0, 60.0);
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_iou_half_shift() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let shifted = bbox(5.0, 0.0, 15.0, 10.0);
        // Overlap 50, union 150.
        assert!((iou(&a, &shifted) - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_suppression_keeps_strongest() {
        let candidates = vec![
            (bbox(1.0, 1.0, 11.0, 11.0), 0.8),
            (bbox(0.0, 0.0, 10.0, 10.0), 0.9),
            (bbox(50.0, 50.0, 60.0, 60.0), 0.7),
        ];
        let kept = suppress_overlaps(candidates, MAX_OVERLAP);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].1 - 0.9).abs() < 1e-6);
        assert!((kept[1].1 - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_face_region_clamps_to_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 80));

        // A box near the corner: margin expansion must stay inside.
        let crop = face_region(&img, &bbox(90.0, 70.0, 99.0, 79.0));
        assert!(crop.width() >= 1 && crop.width() <= 100);
        assert!(crop.height() >= 1 && crop.height() <= 80);

        // An interior box picks up the margin on every side.
        let crop = face_region(&img, &bbox(40.0, 30.0, 60.0, 50.0));
        assert_eq!(crop.width(), 30);
        assert_eq!(crop.height(), 30);
    }
}
