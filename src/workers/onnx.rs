//! Shared ONNX plumbing for the model-backed workers: lazy session
//! loading, staged model downloads, and the channel-major plane layout
//! the vision models consume.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A downloadable ONNX model.
pub(crate) struct ModelSpec {
    pub file: &'static str,
    pub url: &'static str,
}

/// Run `f` against the lazily-loaded session for `spec`. The first
/// call loads (and if needed downloads) the model; later calls reuse
/// the cached session behind the slot's mutex.
pub(crate) fn with_session<R>(
    slot: &Mutex<Option<Session>>,
    models_dir: &Path,
    spec: &ModelSpec,
    f: impl FnOnce(&mut Session) -> Result<R>,
) -> Result<R> {
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(load_session(models_dir, spec)?);
    }
    let Some(session) = guard.as_mut() else {
        return Err(Error::Unavailable(format!("{} did not load", spec.file)));
    };
    f(session)
}

fn load_session(models_dir: &Path, spec: &ModelSpec) -> Result<Session> {
    // Probe the runtime before any download, so an environment without
    // the ONNX runtime fails fast instead of fetching a model it can
    // never run.
    let mut builder = (|| -> std::result::Result<SessionBuilder, ort::Error> {
        let b = Session::builder()?;
        let b = b.with_optimization_level(GraphOptimizationLevel::Level3)?;
        let b = b.with_intra_threads(2)?;
        Ok(b)
    })()
    .map_err(|e| Error::Unavailable(format!("onnx runtime unavailable: {e}")))?;

    let model_path = fetch_model(models_dir, spec)?;
    builder
        .commit_from_file(&model_path)
        .map_err(|e| Error::Unavailable(format!("cannot load {}: {e}", spec.file)))
}

/// Download to a staging file and rename into place; an interrupted
/// fetch never leaves a truncated model behind.
fn fetch_model(models_dir: &Path, spec: &ModelSpec) -> Result<PathBuf> {
    let target = models_dir.join(spec.file);
    if target.exists() {
        return Ok(target);
    }

    std::fs::create_dir_all(models_dir)?;
    tracing::info!(model = spec.file, "Fetching model");
    let response = ureq::get(spec.url)
        .call()
        .map_err(|e| Error::Unavailable(format!("download of {} failed: {e}", spec.file)))?;

    let staging = target.with_extension("part");
    {
        let mut out = std::fs::File::create(&staging)?;
        std::io::copy(&mut response.into_reader(), &mut out)?;
    }
    std::fs::rename(&staging, &target)?;
    tracing::info!(model = spec.file, "Model ready");
    Ok(target)
}

/// Resize to `width x height` and lay pixels out channel-major (NCHW,
/// batch of one), normalizing each value through `normalize(channel,
/// raw_byte)`.
pub(crate) fn scaled_planes<F>(
    img: &DynamicImage,
    width: u32,
    height: u32,
    normalize: F,
) -> Vec<f32>
where
    F: Fn(usize, u8) -> f32,
{
    let rgb: RgbImage = img
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let area = (width * height) as usize;
    let mut planes = vec![0.0f32; 3 * area];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width as usize + x as usize;
        for channel in 0..3 {
            planes[channel * area + offset] = normalize(channel, pixel[channel]);
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_planes_are_channel_major() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
        let planes = scaled_planes(&img, 4, 4, |_, v| v as f32);

        assert_eq!(planes.len(), 3 * 16);
        // Solid color survives the resize; each plane is uniform.
        assert!(planes[..16].iter().all(|&v| (v - 10.0).abs() < 0.5));
        assert!(planes[16..32].iter().all(|&v| (v - 20.0).abs() < 0.5));
        assert!(planes[32..].iter().all(|&v| (v - 30.0).abs() < 0.5));
    }

    #[test]
    fn test_normalize_sees_channel_index() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([100, 100, 100])));
        let planes = scaled_planes(&img, 2, 2, |channel, v| v as f32 + channel as f32 * 1000.0);

        assert!((planes[0] - 100.0).abs() < 0.5);
        assert!((planes[4] - 1100.0).abs() < 0.5);
        assert!((planes[8] - 2100.0).abs() < 0.5);
    }
}
