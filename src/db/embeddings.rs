//! Embedding storage: little-endian f32 blobs, normalized on insert.

use rusqlite::{params, OptionalExtension};

use super::{now_timestamp, Database};
use crate::error::{Error, Result};

/// Embedding record from the database.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub photo_id: i64,
    pub vector: Vec<f32>,
    pub model_name: String,
}

impl Database {
    /// Store an embedding for a photo. The vector is L2-normalized
    /// before persisting; zero-norm and non-finite vectors are invalid.
    pub fn put_embedding(&self, photo_id: i64, vector: &[f32], model_name: &str) -> Result<()> {
        let normalized = normalize(vector)?;
        let bytes = vector_to_bytes(&normalized);

        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO embeddings (photo_id, vector, dim, model_name, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                photo_id,
                bytes,
                normalized.len() as i64,
                model_name,
                now_timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, photo_id: i64) -> Result<Option<EmbeddingRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT photo_id, vector, model_name FROM embeddings WHERE photo_id = ?",
                [photo_id],
                |row| {
                    let bytes: Vec<u8> = row.get(1)?;
                    Ok(EmbeddingRecord {
                        photo_id: row.get(0)?,
                        vector: bytes_to_vector(&bytes),
                        model_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// All embeddings, for vector index rebuilds.
    pub fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT photo_id, vector, model_name FROM embeddings ORDER BY photo_id")?;
        let records = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(EmbeddingRecord {
                    photo_id: row.get(0)?,
                    vector: bytes_to_vector(&bytes),
                    model_name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count_embeddings(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// L2-normalize, rejecting vectors the index cannot score.
pub fn normalize(vector: &[f32]) -> Result<Vec<f32>> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::Invalid("embedding contains NaN or Inf".to_string()));
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(Error::Invalid("embedding has zero norm".to_string()));
    }
    Ok(vector.iter().map(|v| v / norm).collect())
}

/// Convert f32 slice to little-endian bytes for storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &val in vector {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to an f32 vector.
pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::sample_photo;

    #[test]
    fn test_vector_blob_round_trip_exact() {
        let original = vec![1.5f32, -2.3, 0.0, 100.0, f32::MIN_POSITIVE];
        let bytes = vector_to_bytes(&original);
        let recovered = bytes_to_vector(&bytes);
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_put_embedding_normalizes() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        db.put_embedding(id, &[3.0, 4.0], "clip-vit-b32").unwrap();
        let record = db.get_embedding(id).unwrap().unwrap();
        let norm: f32 = record.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((record.vector[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_put_embedding_rejects_bad_vectors() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        assert!(db.put_embedding(id, &[0.0, 0.0], "m").is_err());
        assert!(db.put_embedding(id, &[f32::NAN, 1.0], "m").is_err());
        assert!(db.put_embedding(id, &[f32::INFINITY, 1.0], "m").is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - (-1.0)).abs() < 0.0001);
    }
}
