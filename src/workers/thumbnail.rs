//! Thumbnail worker: downscale to a 256px max edge, apply EXIF
//! orientation, and write a content-addressed cache file. WebP is the
//! preferred output; JPEG (with size-adaptive quality) is the fallback.

use image::{DynamicImage, GenericImageView};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::DescriptorWorker;
use crate::db::{PhotoRecord, ThumbnailRecord};
use crate::error::{Error, Result};

const MAX_EDGE: u32 = 256;

pub struct ThumbnailWorker {
    cache_root: PathBuf,
}

impl ThumbnailWorker {
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache layout: `{sha1[0:2]}/{sha1[2:4]}/{sha1}.{ext}`.
    fn rel_path(sha1: &str, ext: &str) -> String {
        format!("{}/{}/{sha1}.{ext}", &sha1[0..2], &sha1[2..4])
    }

    fn render(&self, photo: &PhotoRecord) -> Result<ThumbnailRecord> {
        let sha1 = photo.sha1.as_deref().ok_or_else(|| {
            Error::Invalid(format!("photo {} has no content hash yet", photo.id))
        })?;
        if sha1.len() < 4 {
            return Err(Error::Invalid(format!("malformed sha1 '{sha1}'")));
        }

        let source = Path::new(&photo.path);
        if matches!(photo.ext.to_lowercase().as_str(), "heic" | "heif") {
            // No HEIF decoder in the image stack; recorded and skipped.
            return Err(Error::Unavailable(format!(
                "HEIF decoding unavailable for {}",
                photo.path
            )));
        }

        let img = image::open(source)
            .map_err(|e| Error::Invalid(format!("cannot decode {}: {e}", photo.path)))?;
        let img = apply_orientation(img, read_orientation(source));
        let thumb = img.thumbnail(MAX_EDGE, MAX_EDGE);
        let (width, height) = (thumb.width(), thumb.height());

        // WebP first; fall back to JPEG with adaptive quality if the
        // encode fails for this image.
        let webp_rel = Self::rel_path(sha1, "webp");
        match self.write_webp(&thumb, &webp_rel) {
            Ok(()) => Ok(ThumbnailRecord {
                rel_path: webp_rel,
                width,
                height,
                format: "webp".to_string(),
            }),
            Err(webp_err) => {
                tracing::debug!(path = %photo.path, error = %webp_err, "WebP encode failed, falling back to JPEG");
                let jpeg_rel = Self::rel_path(sha1, "jpg");
                self.write_jpeg(&thumb, &jpeg_rel, jpeg_quality(photo.size_bytes))?;
                Ok(ThumbnailRecord {
                    rel_path: jpeg_rel,
                    width,
                    height,
                    format: "jpeg".to_string(),
                })
            }
        }
    }

    fn write_webp(&self, thumb: &DynamicImage, rel_path: &str) -> Result<()> {
        let target = self.prepare_target(rel_path)?;
        let file = File::create(&target)?;
        let encoder = image::codecs::webp::WebPEncoder::new_lossless(BufWriter::new(file));
        thumb
            .write_with_encoder(encoder)
            .map_err(|e| Error::Invalid(format!("webp encode failed: {e}")))?;
        Ok(())
    }

    fn write_jpeg(&self, thumb: &DynamicImage, rel_path: &str, quality: u8) -> Result<()> {
        let target = self.prepare_target(rel_path)?;
        let file = File::create(&target)?;
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(BufWriter::new(file), quality);
        // JPEG has no alpha channel.
        thumb
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| Error::Invalid(format!("jpeg encode failed: {e}")))?;
        Ok(())
    }

    fn prepare_target(&self, rel_path: &str) -> Result<PathBuf> {
        let target = self.cache_root.join(rel_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(target)
    }
}

impl DescriptorWorker for ThumbnailWorker {
    type Artifact = ThumbnailRecord;

    fn name(&self) -> &'static str {
        "thumbnail"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn process(&self, photo: &PhotoRecord) -> Result<ThumbnailRecord> {
        self.render(photo)
    }
}

/// Smaller sources can afford a higher-quality fallback JPEG.
fn jpeg_quality(source_bytes: i64) -> u8 {
    match source_bytes {
        b if b < 500_000 => 90,
        b if b < 2_000_000 => 85,
        b if b < 8_000_000 => 80,
        _ => 75,
    }
}

fn read_orientation(path: &Path) -> i64 {
    let Ok(file) = File::open(path) else { return 1 };
    let mut reader = std::io::BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| match field.value {
            exif::Value::Short(ref v) => v.first().map(|&o| o as i64),
            _ => None,
        })
        .unwrap_or(1)
}

fn apply_orientation(img: DynamicImage, orientation: i64) -> DynamicImage {
    match orientation {
        3 => img.rotate180(),
        6 => img.rotate90(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn test_photo(path: &Path, size_bytes: i64) -> PhotoRecord {
        PhotoRecord {
            id: 1,
            path: path.to_string_lossy().to_string(),
            folder: path.parent().unwrap().to_string_lossy().to_string(),
            filename: path.file_name().unwrap().to_string_lossy().to_string(),
            ext: path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes,
            created_at: None,
            modified_at: None,
            sha1: Some("0123456789abcdef0123456789abcdef01234567".to_string()),
            perceptual_hash: None,
            indexed_at: None,
            index_version: 0,
            tags: None,
        }
    }

    fn write_test_image(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 255) as u8, (y % 255) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_thumbnail_generated_content_addressed() {
        let src_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let source = src_dir.path().join("photo.png");
        write_test_image(&source, 800, 600);

        let worker = ThumbnailWorker::new(cache_dir.path().to_path_buf());
        let photo = test_photo(&source, 1024);
        let thumb = worker.process(&photo).unwrap();

        assert_eq!(
            thumb.rel_path,
            "01/23/0123456789abcdef0123456789abcdef01234567.webp"
        );
        assert!(thumb.width <= 256 && thumb.height <= 256);
        // 800x600 downscaled preserving aspect: 256x192.
        assert_eq!((thumb.width, thumb.height), (256, 192));

        let on_disk = cache_dir.path().join(&thumb.rel_path);
        assert!(on_disk.exists());
        let decoded = image::open(&on_disk).unwrap();
        assert_eq!(decoded.width(), 256);
    }

    #[test]
    fn test_heic_reports_unavailable() {
        let src_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let source = src_dir.path().join("photo.heic");
        std::fs::write(&source, b"fake heic bytes").unwrap();

        let worker = ThumbnailWorker::new(cache_dir.path().to_path_buf());
        let err = worker.process(&test_photo(&source, 1024)).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[test]
    fn test_missing_sha1_is_invalid() {
        let cache_dir = tempdir().unwrap();
        let worker = ThumbnailWorker::new(cache_dir.path().to_path_buf());
        let mut photo = test_photo(Path::new("/tmp/x.png"), 10);
        photo.sha1 = None;
        assert!(matches!(
            worker.process(&photo),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_adaptive_jpeg_quality() {
        assert_eq!(jpeg_quality(100_000), 90);
        assert_eq!(jpeg_quality(1_000_000), 85);
        assert_eq!(jpeg_quality(5_000_000), 80);
        assert_eq!(jpeg_quality(20_000_000), 75);
    }
}
