//! EXIF extraction worker. Absent or corrupt EXIF yields an empty
//! record, never a failure.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::DescriptorWorker;
use crate::db::{ExifRecord, PhotoRecord};
use crate::error::Result;

pub struct ExifWorker;

impl ExifWorker {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, path: &Path) -> ExifRecord {
        let mut record = ExifRecord::default();

        let Ok(file) = File::open(path) else {
            return record;
        };
        let mut bufreader = BufReader::new(file);
        let Ok(exif) = exif::Reader::new().read_from_container(&mut bufreader) else {
            return record;
        };

        if let Some(field) = exif.get_field(exif::Tag::Make, exif::In::PRIMARY) {
            record.camera_make = Some(display_string(field));
        }
        if let Some(field) = exif.get_field(exif::Tag::Model, exif::In::PRIMARY) {
            record.camera_model = Some(display_string(field));
        }
        if let Some(field) = exif.get_field(exif::Tag::LensModel, exif::In::PRIMARY) {
            record.lens = Some(display_string(field));
        }
        if let Some(field) = exif.get_field(exif::Tag::FocalLength, exif::In::PRIMARY) {
            record.focal_length = first_rational(field);
        }
        if let Some(field) = exif.get_field(exif::Tag::FNumber, exif::In::PRIMARY) {
            record.aperture = first_rational(field);
        }
        if let Some(field) = exif.get_field(exif::Tag::ExposureTime, exif::In::PRIMARY) {
            record.shutter_speed = Some(field.display_value().to_string());
        }
        if let Some(field) = exif.get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY) {
            if let exif::Value::Short(ref v) = field.value {
                record.iso = v.first().map(|&iso| iso as i64);
            }
        }
        if let Some(field) = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
            record.shot_dt = Some(normalize_datetime(&display_string(field)));
        }
        if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
            if let exif::Value::Short(ref v) = field.value {
                record.orientation = v.first().map(|&o| o as i64);
            }
        }

        // GPS needs all four fields to be meaningful.
        if let (Some(lat_field), Some(lat_ref), Some(lon_field), Some(lon_ref)) = (
            exif.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY),
            exif.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY),
            exif.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY),
            exif.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY),
        ) {
            if let (exif::Value::Rational(lat_vals), exif::Value::Rational(lon_vals)) =
                (&lat_field.value, &lon_field.value)
            {
                if lat_vals.len() >= 3 && lon_vals.len() >= 3 {
                    let lat = dms_to_decimal(
                        lat_vals[0].num as f64 / lat_vals[0].denom as f64,
                        lat_vals[1].num as f64 / lat_vals[1].denom as f64,
                        lat_vals[2].num as f64 / lat_vals[2].denom as f64,
                    );
                    let lon = dms_to_decimal(
                        lon_vals[0].num as f64 / lon_vals[0].denom as f64,
                        lon_vals[1].num as f64 / lon_vals[1].denom as f64,
                        lon_vals[2].num as f64 / lon_vals[2].denom as f64,
                    );

                    let lat_ref_str = lat_ref.display_value().to_string();
                    let lon_ref_str = lon_ref.display_value().to_string();

                    record.gps_latitude = Some(if lat_ref_str.contains('S') { -lat } else { lat });
                    record.gps_longitude = Some(if lon_ref_str.contains('W') { -lon } else { lon });
                }
            }
        }

        record
    }
}

impl Default for ExifWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorWorker for ExifWorker {
    type Artifact = ExifRecord;

    fn name(&self) -> &'static str {
        "exif"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn process(&self, photo: &PhotoRecord) -> Result<ExifRecord> {
        Ok(self.extract(Path::new(&photo.path)))
    }
}

fn display_string(field: &exif::Field) -> String {
    field
        .display_value()
        .to_string()
        .trim_matches('"')
        .to_string()
}

fn first_rational(field: &exif::Field) -> Option<f64> {
    if let exif::Value::Rational(ref v) = field.value {
        v.first().map(|r| r.num as f64 / r.denom as f64)
    } else {
        None
    }
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

/// EXIF stores "2023:06:01 12:30:00"; the db uses ISO-8601.
fn normalize_datetime(raw: &str) -> String {
    let mut chars: Vec<char> = raw.chars().collect();
    if chars.len() >= 10 {
        if chars[4] == ':' {
            chars[4] = '-';
        }
        if chars[7] == ':' {
            chars[7] = '-';
        }
        if chars.len() >= 11 && chars[10] == ' ' {
            chars[10] = 'T';
        }
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_empty_record() {
        let worker = ExifWorker::new();
        let record = worker.extract(Path::new("/no/such/photo.jpg"));
        assert_eq!(record, ExifRecord::default());
    }

    #[test]
    fn test_corrupt_exif_yields_empty_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"not really a jpeg at all").unwrap();

        let worker = ExifWorker::new();
        assert_eq!(worker.extract(&path), ExifRecord::default());
    }

    #[test]
    fn test_datetime_normalization() {
        assert_eq!(
            normalize_datetime("2023:06:01 12:30:00"),
            "2023-06-01T12:30:00"
        );
        assert_eq!(normalize_datetime("oddball"), "oddball");
    }

    #[test]
    fn test_dms_conversion() {
        let decimal = dms_to_decimal(51.0, 30.0, 0.0);
        assert!((decimal - 51.5).abs() < 1e-9);
    }
}
