use rusqlite::{params, OptionalExtension};

use super::{now_timestamp, Database};
use crate::error::Result;

/// Cached thumbnail for a photo. `rel_path` is relative to the
/// thumbnail cache root and content-addressed by SHA-1.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailRecord {
    pub rel_path: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

impl Database {
    pub fn put_thumbnail(&self, photo_id: i64, thumb: &ThumbnailRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO thumbnails (photo_id, rel_path, width, height, format, generated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                photo_id,
                thumb.rel_path,
                thumb.width,
                thumb.height,
                thumb.format,
                now_timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn get_thumbnail(&self, photo_id: i64) -> Result<Option<ThumbnailRecord>> {
        let conn = self.conn();
        let thumb = conn
            .query_row(
                "SELECT rel_path, width, height, format FROM thumbnails WHERE photo_id = ?",
                [photo_id],
                |row| {
                    Ok(ThumbnailRecord {
                        rel_path: row.get(0)?,
                        width: row.get(1)?,
                        height: row.get(2)?,
                        format: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(thumb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::sample_photo;

    #[test]
    fn test_thumbnail_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        let thumb = ThumbnailRecord {
            rel_path: "da/39/da39a3ee5e6b4b0d3255bfef95601890afd80709.webp".to_string(),
            width: 256,
            height: 171,
            format: "webp".to_string(),
        };
        db.put_thumbnail(id, &thumb).unwrap();
        assert_eq!(db.get_thumbnail(id).unwrap().unwrap(), thumb);
        assert!(db.get_thumbnail(id + 1).unwrap().is_none());
    }
}
