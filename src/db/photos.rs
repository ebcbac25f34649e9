//! Photo rows: upsert from the crawler, descriptor predicates for the
//! pipeline, and deletion with cascades.

use rusqlite::{params, OptionalExtension};

use super::{now_timestamp, Database};
use crate::error::Result;

/// Full photo row.
#[derive(Debug, Clone)]
pub struct PhotoRecord {
    pub id: i64,
    pub path: String,
    pub folder: String,
    pub filename: String,
    pub ext: String,
    pub size_bytes: i64,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub sha1: Option<String>,
    pub perceptual_hash: Option<String>,
    pub indexed_at: Option<String>,
    pub index_version: i64,
    pub tags: Option<String>,
}

/// Fields the crawler supplies when a file is discovered or re-seen.
#[derive(Debug, Clone)]
pub struct PhotoUpsert {
    pub path: String,
    pub folder: String,
    pub filename: String,
    pub ext: String,
    pub size_bytes: i64,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub sha1: Option<String>,
    pub perceptual_hash: Option<String>,
}

/// Descriptor kinds a photo may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Exif,
    Embedding,
    Thumbnail,
    Face,
}

impl Descriptor {
    fn table(&self) -> &'static str {
        match self {
            Descriptor::Exif => "exif",
            Descriptor::Embedding => "embeddings",
            Descriptor::Thumbnail => "thumbnails",
            Descriptor::Face => "faces",
        }
    }
}

fn row_to_photo(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        folder: row.get(2)?,
        filename: row.get(3)?,
        ext: row.get(4)?,
        size_bytes: row.get(5)?,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
        sha1: row.get(8)?,
        perceptual_hash: row.get(9)?,
        indexed_at: row.get(10)?,
        index_version: row.get(11)?,
        tags: row.get(12)?,
    })
}

const PHOTO_COLUMNS: &str = "id, path, folder, filename, ext, size_bytes, created_at, \
     modified_at, sha1, perceptual_hash, indexed_at, index_version, tags";

impl Database {
    /// Insert a new photo or refresh an existing row for the same path.
    /// A re-seen modified file gets its hashes replaced and its
    /// `indexed_at` cleared so descriptors are re-extracted.
    pub fn upsert_photo(&self, photo: &PhotoUpsert) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO photos (path, folder, filename, ext, size_bytes, created_at,
                                modified_at, sha1, perceptual_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(path) DO UPDATE SET
                folder = ?2, filename = ?3, ext = ?4, size_bytes = ?5,
                created_at = ?6, modified_at = ?7, sha1 = ?8, perceptual_hash = ?9,
                indexed_at = NULL
            "#,
            params![
                photo.path,
                photo.folder,
                photo.filename,
                photo.ext,
                photo.size_bytes,
                photo.created_at,
                photo.modified_at,
                photo.sha1,
                photo.perceptual_hash,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM photos WHERE path = ?",
            [&photo.path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Delete a photo row; exif, embeddings, thumbnails, and faces
    /// cascade. The caller is responsible for the vector index entry.
    pub fn delete_photo(&self, id: i64) -> Result<bool> {
        let deleted = self.conn().execute("DELETE FROM photos WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    pub fn get_photo(&self, id: i64) -> Result<Option<PhotoRecord>> {
        let conn = self.conn();
        let photo = conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?"),
                [id],
                row_to_photo,
            )
            .optional()?;
        Ok(photo)
    }

    pub fn get_photo_by_path(&self, path: &str) -> Result<Option<PhotoRecord>> {
        let conn = self.conn();
        let photo = conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE path = ?"),
                [path],
                row_to_photo,
            )
            .optional()?;
        Ok(photo)
    }

    /// All known paths with (size, mtime), for crawl classification and
    /// deletion detection.
    pub fn all_photo_paths(&self) -> Result<Vec<(i64, String, i64, Option<String>)>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, path, size_bytes, modified_at FROM photos")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Photos that still need a descriptor of the given kind: no row in
    /// the descriptor table, or stamped with an older index version
    /// (modified since last run). Faces are keyed off `indexed_at`
    /// instead, because a photo with zero faces legitimately has no
    /// face rows.
    pub fn list_photos_missing(&self, descriptor: Descriptor, current_version: i64) -> Result<Vec<PhotoRecord>> {
        let conn = self.conn();
        let predicate = match descriptor {
            Descriptor::Face => {
                "p.indexed_at IS NULL OR p.index_version < ?1".to_string()
            }
            other => format!(
                "NOT EXISTS (SELECT 1 FROM {} d WHERE d.photo_id = p.id)
                 OR p.index_version < ?1",
                other.table()
            ),
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos p WHERE {predicate} ORDER BY p.id"
        ))?;
        let rows = stmt
            .query_map([current_version], row_to_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Photos not yet stamped at the current index version; the set the
    /// orchestrator marks once their descriptors are all written.
    pub fn list_unmarked_photos(&self, current_version: i64) -> Result<Vec<PhotoRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos p
             WHERE p.indexed_at IS NULL OR p.index_version < ?1
             ORDER BY p.id"
        ))?;
        let rows = stmt
            .query_map([current_version], row_to_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Stamp a photo as fully described at the current index version.
    pub fn mark_photo_indexed(&self, id: i64, index_version: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE photos SET indexed_at = ?1, index_version = ?2 WHERE id = ?3",
            params![now_timestamp(), index_version, id],
        )?;
        Ok(())
    }

    /// Clear `indexed_at` on every photo, forcing a full reindex.
    pub fn clear_indexed_marks(&self) -> Result<usize> {
        let cleared = self
            .conn()
            .execute("UPDATE photos SET indexed_at = NULL", [])?;
        Ok(cleared)
    }

    pub fn count_photos(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Groups of photos sharing a SHA-1, largest groups first.
    pub fn find_duplicates(&self) -> Result<Vec<Vec<PhotoRecord>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sha1 FROM photos
             WHERE sha1 IS NOT NULL
             GROUP BY sha1 HAVING COUNT(*) > 1
             ORDER BY COUNT(*) DESC",
        )?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups = Vec::with_capacity(hashes.len());
        let mut photo_stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE sha1 = ? ORDER BY path"
        ))?;
        for sha1 in hashes {
            let group = photo_stmt
                .query_map([&sha1], row_to_photo)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            groups.push(group);
        }
        Ok(groups)
    }

    /// Replace the tags array on a photo (None clears it).
    pub fn set_photo_tags(&self, id: i64, tags: Option<&[String]>) -> Result<()> {
        let json = match tags {
            Some(t) => Some(serde_json::to_string(t).map_err(anyhow::Error::from)?),
            None => None,
        };
        self.conn().execute(
            "UPDATE photos SET tags = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        Ok(())
    }

    pub fn get_photo_tags(&self, id: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row("SELECT tags FROM photos WHERE id = ?", [id], |row| row.get(0))
            .optional()?
            .flatten();
        match json {
            Some(j) => Ok(serde_json::from_str(&j).map_err(anyhow::Error::from)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_photo(path: &str) -> PhotoUpsert {
    let p = std::path::Path::new(path);
    PhotoUpsert {
        path: path.to_string(),
        folder: p.parent().unwrap().to_string_lossy().to_string(),
        filename: p.file_name().unwrap().to_string_lossy().to_string(),
        ext: p
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default(),
        size_bytes: 1024,
        created_at: Some("2023-06-01T10:00:00".to_string()),
        modified_at: Some("2023-06-01T10:00:00".to_string()),
        sha1: Some("da39a3ee5e6b4b0d3255bfef95601890afd80709".to_string()),
        perceptual_hash: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_is_stable_per_path() {
        let db = Database::open_in_memory().unwrap();
        let id1 = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        let id2 = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(db.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_upsert_modified_clears_indexed_at() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.mark_photo_indexed(id, 1).unwrap();
        assert!(db.get_photo(id).unwrap().unwrap().indexed_at.is_some());

        let mut modified = sample_photo("/photos/a.jpg");
        modified.size_bytes = 2048;
        db.upsert_photo(&modified).unwrap();
        let photo = db.get_photo(id).unwrap().unwrap();
        assert!(photo.indexed_at.is_none());
        assert_eq!(photo.size_bytes, 2048);
    }

    #[test]
    fn test_missing_descriptor_predicate() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        let missing = db.list_photos_missing(Descriptor::Exif, 1).unwrap();
        assert_eq!(missing.len(), 1);

        db.put_exif(id, &crate::db::ExifRecord::default()).unwrap();
        db.mark_photo_indexed(id, 1).unwrap();
        let missing = db.list_photos_missing(Descriptor::Exif, 1).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.put_exif(id, &crate::db::ExifRecord::default()).unwrap();
        assert!(db.delete_photo(id).unwrap());
        let counts = db.table_counts().unwrap();
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_duplicates_by_sha1() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.upsert_photo(&sample_photo("/photos/b.jpg")).unwrap();
        let groups = db.find_duplicates().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_tags_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.set_photo_tags(id, Some(&["beach".into(), "family".into()]))
            .unwrap();
        assert_eq!(db.get_photo_tags(id).unwrap(), vec!["beach", "family"]);
        db.set_photo_tags(id, None).unwrap();
        assert!(db.get_photo_tags(id).unwrap().is_empty());
    }
}
