use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;

/// Parsed EXIF fields for a photo. Absent or corrupt EXIF yields the
/// default (all-empty) record rather than an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifRecord {
    pub shot_dt: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub iso: Option<i64>,
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub focal_length: Option<f64>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub orientation: Option<i64>,
}

impl Database {
    pub fn put_exif(&self, photo_id: i64, record: &ExifRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO exif (photo_id, shot_dt, camera_make, camera_model,
                                         lens, iso, aperture, shutter_speed,
                                         focal_length, gps_latitude, gps_longitude,
                                         orientation)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                photo_id,
                record.shot_dt,
                record.camera_make,
                record.camera_model,
                record.lens,
                record.iso,
                record.aperture,
                record.shutter_speed,
                record.focal_length,
                record.gps_latitude,
                record.gps_longitude,
                record.orientation,
            ],
        )?;
        Ok(())
    }

    pub fn get_exif(&self, photo_id: i64) -> Result<Option<ExifRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT shot_dt, camera_make, camera_model, lens, iso, aperture,
                        shutter_speed, focal_length, gps_latitude, gps_longitude,
                        orientation
                 FROM exif WHERE photo_id = ?",
                [photo_id],
                |row| {
                    Ok(ExifRecord {
                        shot_dt: row.get(0)?,
                        camera_make: row.get(1)?,
                        camera_model: row.get(2)?,
                        lens: row.get(3)?,
                        iso: row.get(4)?,
                        aperture: row.get(5)?,
                        shutter_speed: row.get(6)?,
                        focal_length: row.get(7)?,
                        gps_latitude: row.get(8)?,
                        gps_longitude: row.get(9)?,
                        orientation: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::sample_photo;

    #[test]
    fn test_exif_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        let record = ExifRecord {
            shot_dt: Some("2023-06-01T12:30:00".to_string()),
            camera_make: Some("Canon".to_string()),
            camera_model: Some("EOS R5".to_string()),
            iso: Some(400),
            aperture: Some(2.8),
            focal_length: Some(50.0),
            orientation: Some(6),
            ..Default::default()
        };
        db.put_exif(id, &record).unwrap();
        assert_eq!(db.get_exif(id).unwrap().unwrap(), record);
    }

    #[test]
    fn test_empty_record_is_valid() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.put_exif(id, &ExifRecord::default()).unwrap();
        assert_eq!(db.get_exif(id).unwrap().unwrap(), ExifRecord::default());
    }
}
