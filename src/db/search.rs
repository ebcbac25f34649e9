//! Text search over photo rows with a badge cascade.
//!
//! Four signals contribute: filename, folder, EXIF make/model, and an
//! optional externally-attached OCR table. A source matches when every
//! query token appears in it; matches contribute a badge and a fixed
//! integer weight. Ties break by modification time, newest first.

use rusqlite::types::Value;

use super::Database;
use crate::error::Result;

/// Conjunctive filters applied on top of the text match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to folders starting with this prefix.
    pub folder_prefix: Option<String>,
    /// Shot-date range (ISO dates); falls back to file mtime when a
    /// photo has no EXIF capture date.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    /// Restrict to these lowercase extensions.
    pub extensions: Option<Vec<String>>,
}

/// One text-search hit with the signals that matched.
#[derive(Debug, Clone)]
pub struct TextHit {
    pub file_id: i64,
    pub path: String,
    pub folder: String,
    pub filename: String,
    pub thumb_path: Option<String>,
    pub shot_dt: Option<String>,
    pub score: i64,
    pub badges: Vec<String>,
}

const WEIGHT_FILENAME: i64 = 8;
const WEIGHT_FOLDER: i64 = 4;
const WEIGHT_EXIF: i64 = 2;
const WEIGHT_OCR: i64 = 1;

impl Database {
    /// Run a text query. Returns the page of hits plus the total match
    /// count before paging.
    pub fn text_query(
        &self,
        q: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TextHit>, usize)> {
        let tokens: Vec<String> = q
            .split_whitespace()
            .map(|t| format!("%{}%", t.to_lowercase()))
            .collect();
        if tokens.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let conn = self.conn();

        let has_ocr: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'ocr_text'",
            [],
            |row| row.get(0),
        )?;

        let mut params: Vec<Value> = Vec::new();

        // One all-tokens conjunction per source field.
        let filename_match = all_tokens_match("p.filename", &tokens, &mut params);
        let folder_match = all_tokens_match("p.folder", &tokens, &mut params);
        let exif_match = all_tokens_match(
            "IFNULL(e.camera_make, '') || ' ' || IFNULL(e.camera_model, '')",
            &tokens,
            &mut params,
        );
        let ocr_match = if has_ocr > 0 {
            let inner = all_tokens_match("o.text", &tokens, &mut params);
            format!(
                "EXISTS (SELECT 1 FROM ocr_text o WHERE o.photo_id = p.id AND {inner})"
            )
        } else {
            "0".to_string()
        };

        let mut where_clauses = vec!["hit.score > 0".to_string()];
        if let Some(prefix) = &filters.folder_prefix {
            params.push(Value::Text(format!("{prefix}%")));
            where_clauses.push(format!("hit.folder LIKE ?{}", params.len()));
        }
        if let Some(from) = &filters.date_from {
            params.push(Value::Text(from.clone()));
            where_clauses.push(format!(
                "COALESCE(hit.shot_dt, hit.modified_at) >= ?{}",
                params.len()
            ));
        }
        if let Some(to) = &filters.date_to {
            // Inclusive end of day for bare dates.
            params.push(Value::Text(format!("{to}\u{ffff}")));
            where_clauses.push(format!(
                "COALESCE(hit.shot_dt, hit.modified_at) <= ?{}",
                params.len()
            ));
        }
        if let Some(exts) = &filters.extensions {
            let mut placeholders = Vec::new();
            for ext in exts {
                params.push(Value::Text(ext.to_lowercase()));
                placeholders.push(format!("?{}", params.len()));
            }
            where_clauses.push(format!("LOWER(hit.ext) IN ({})", placeholders.join(", ")));
        }
        let where_sql = where_clauses.join(" AND ");

        let base_sql = format!(
            r#"
            SELECT * FROM (
                SELECT p.id, p.path, p.folder, p.filename, p.ext, p.modified_at,
                       e.shot_dt AS shot_dt, t.rel_path AS thumb_path,
                       ({filename_match}) AS m_filename,
                       ({folder_match}) AS m_folder,
                       ({exif_match}) AS m_exif,
                       ({ocr_match}) AS m_ocr,
                       ({filename_match}) * {WEIGHT_FILENAME}
                         + ({folder_match}) * {WEIGHT_FOLDER}
                         + ({exif_match}) * {WEIGHT_EXIF}
                         + ({ocr_match}) * {WEIGHT_OCR} AS score
                FROM photos p
                LEFT JOIN exif e ON e.photo_id = p.id
                LEFT JOIN thumbnails t ON t.photo_id = p.id
            ) hit
            WHERE {where_sql}
            "#
        );

        let count_sql = format!("SELECT COUNT(*) FROM ({base_sql})");
        let total: i64 = conn.query_row(
            &count_sql,
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        params.push(Value::Integer(limit as i64));
        let limit_idx = params.len();
        params.push(Value::Integer(offset as i64));
        let offset_idx = params.len();

        let page_sql = format!(
            "{base_sql} ORDER BY hit.score DESC, hit.modified_at DESC, hit.id ASC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );

        let mut stmt = conn.prepare(&page_sql)?;
        let hits = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let mut badges = Vec::new();
                if row.get::<_, i64>(8)? != 0 {
                    badges.push("filename".to_string());
                }
                if row.get::<_, i64>(9)? != 0 {
                    badges.push("folder".to_string());
                }
                if row.get::<_, i64>(10)? != 0 {
                    badges.push("exif".to_string());
                }
                if row.get::<_, i64>(11)? != 0 {
                    badges.push("ocr".to_string());
                }
                Ok(TextHit {
                    file_id: row.get(0)?,
                    path: row.get(1)?,
                    folder: row.get(2)?,
                    filename: row.get(3)?,
                    shot_dt: row.get(6)?,
                    thumb_path: row.get(7)?,
                    score: row.get(12)?,
                    badges,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((hits, total as usize))
    }
}

/// Build `(LOWER(field) LIKE ?a AND LOWER(field) LIKE ?b ...)` over all
/// query tokens, pushing one parameter per token.
fn all_tokens_match(field: &str, tokens: &[String], params: &mut Vec<Value>) -> String {
    let clauses: Vec<String> = tokens
        .iter()
        .map(|token| {
            params.push(Value::Text(token.clone()));
            format!("LOWER({field}) LIKE ?{}", params.len())
        })
        .collect();
    format!("CASE WHEN {} THEN 1 ELSE 0 END", clauses.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::sample_photo;
    use crate::db::ExifRecord;

    fn seed(db: &Database) {
        for path in [
            "/photos/IMG_1234.jpg",
            "/photos/wedding_smith_2023.jpg",
            "/photos/vacation.jpg",
        ] {
            db.upsert_photo(&sample_photo(path)).unwrap();
        }
    }

    #[test]
    fn test_filename_query_ranks_first_with_badge() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let (hits, total) = db
            .text_query("wedding smith 2023", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].filename, "wedding_smith_2023.jpg");
        assert!(hits[0].badges.contains(&"filename".to_string()));
    }

    #[test]
    fn test_folder_match_scores_below_filename() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_photo(&sample_photo("/trips/beach/coast.jpg")).unwrap();
        db.upsert_photo(&sample_photo("/photos/beach.jpg")).unwrap();

        let (hits, _) = db
            .text_query("beach", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].filename, "beach.jpg");
        assert!(hits[1].badges.contains(&"folder".to_string()));
    }

    #[test]
    fn test_exif_make_model_badge() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        db.put_exif(
            id,
            &ExifRecord {
                camera_make: Some("Canon".to_string()),
                camera_model: Some("EOS R5".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let (hits, _) = db
            .text_query("canon", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].badges, vec!["exif"]);
    }

    #[test]
    fn test_filters_compose_conjunctively() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let filters = SearchFilters {
            folder_prefix: Some("/photos".to_string()),
            extensions: Some(vec!["jpg".to_string()]),
            date_from: Some("2023-01-01".to_string()),
            date_to: Some("2023-12-31".to_string()),
            ..Default::default()
        };
        let (hits, _) = db.text_query("vacation", &filters, 10, 0).unwrap();
        assert_eq!(hits.len(), 1);

        let filters = SearchFilters {
            folder_prefix: Some("/elsewhere".to_string()),
            ..Default::default()
        };
        let (hits, total) = db.text_query("vacation", &filters, 10, 0).unwrap();
        assert!(hits.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_ocr_table_joined_when_present() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/scan_0042.jpg")).unwrap();

        // Without the external table the source contributes nothing.
        let (hits, _) = db
            .text_query("receipt", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert!(hits.is_empty());

        {
            let conn = db.conn();
            conn.execute_batch(
                "CREATE TABLE ocr_text (photo_id INTEGER NOT NULL, text TEXT NOT NULL)",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO ocr_text (photo_id, text) VALUES (?1, 'grocery receipt total')",
                [id],
            )
            .unwrap();
        }

        let (hits, _) = db
            .text_query("receipt", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].badges, vec!["ocr"]);
    }

    #[test]
    fn test_pagination_totals() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.upsert_photo(&sample_photo(&format!("/photos/trip_{i}.jpg")))
                .unwrap();
        }
        let (page, total) = db
            .text_query("trip", &SearchFilters::default(), 2, 2)
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);
        let (hits, total) = db
            .text_query("   ", &SearchFilters::default(), 10, 0)
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(total, 0);
    }
}
