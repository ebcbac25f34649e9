use anyhow::{anyhow, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct HashResult {
    /// 40-char lowercase hex SHA-1 of the file contents.
    pub sha1: String,
    /// Base64 perceptual hash; None for undecodable images.
    pub perceptual: Option<String>,
}

pub fn calculate_hashes(path: &Path) -> Result<HashResult> {
    let sha1 = sha1_of_file(path)?;
    let perceptual = calculate_perceptual_hash(path).ok();
    Ok(HashResult { sha1, perceptual })
}

/// Streamed SHA-1 so large files never load into memory at once.
pub fn sha1_of_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha1::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn calculate_perceptual_hash(path: &Path) -> Result<String> {
    use img_hash::HasherConfig;

    // thumbnail() preserves aspect ratio and is faster than resize
    // for large images; the hash only needs a small input.
    let img = image::open(path)?;
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new().hash_size(16, 16).to_hasher();

    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();

    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

    Ok(hash.to_base64())
}
