//! Faces and people: detection results, enrollment, and the weighted
//! running average that keeps each person's face vector current.

use rusqlite::{params, OptionalExtension};

use super::embeddings::{bytes_to_vector, normalize, vector_to_bytes};
use super::{now_timestamp, Database};
use crate::error::{Error, Result};

/// Face bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// A detected face stored against a photo.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bbox: BoundingBox,
    pub vector: Option<Vec<f32>>,
    pub confidence: Option<f32>,
    pub verified: bool,
}

/// A named person with an averaged face vector.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub face_vector: Option<Vec<f32>>,
    pub sample_count: i64,
    pub active: bool,
}

impl Database {
    /// Store a detected face. Face vectors are normalized like photo
    /// embeddings.
    pub fn put_face(
        &self,
        photo_id: i64,
        bbox: &BoundingBox,
        vector: Option<&[f32]>,
        confidence: Option<f32>,
    ) -> Result<i64> {
        let bytes = match vector {
            Some(v) => Some(vector_to_bytes(&normalize(v)?)),
            None => None,
        };
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO faces (photo_id, x1, y1, x2, y2, vector, confidence)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![photo_id, bbox.x1, bbox.y1, bbox.x2, bbox.y2, bytes, confidence],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Drop stored faces for a photo before re-detection.
    pub fn clear_faces_for_photo(&self, photo_id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM faces WHERE photo_id = ?", [photo_id])?;
        Ok(())
    }

    pub fn get_face(&self, face_id: i64) -> Result<Option<FaceRecord>> {
        let conn = self.conn();
        let face = conn
            .query_row(
                "SELECT id, photo_id, person_id, x1, y1, x2, y2, vector, confidence, verified
                 FROM faces WHERE id = ?",
                [face_id],
                row_to_face,
            )
            .optional()?;
        Ok(face)
    }

    /// Every stored face that has an embedding, for face search ranking.
    pub fn faces_with_vectors(&self) -> Result<Vec<FaceRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, photo_id, person_id, x1, y1, x2, y2, vector, confidence, verified
             FROM faces WHERE vector IS NOT NULL",
        )?;
        let faces = stmt
            .query_map([], row_to_face)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(faces)
    }

    /// Create a person from an initial set of sample face vectors.
    /// The stored vector is the normalized mean of the samples.
    /// An existing name is a conflict and leaves the stored person
    /// untouched.
    pub fn create_person(&self, name: &str, samples: &[Vec<f32>]) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(Error::BadRequest("person name must not be empty".to_string()));
        }
        if samples.is_empty() {
            return Err(Error::BadRequest(
                "at least one sample face is required".to_string(),
            ));
        }

        if self.find_person_by_name(name)?.is_some() {
            return Err(Error::Conflict(format!("person '{name}' already exists")));
        }

        let mean = mean_vector(samples)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO people (name, face_vector, sample_count) VALUES (?1, ?2, ?3)",
            params![name, vector_to_bytes(&mean), samples.len() as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fold additional samples into a person's averaged vector:
    /// v_new = normalize((n * v_old + v_sample) / (n + 1)), applied
    /// per sample.
    pub fn add_person_samples(&self, person_id: i64, samples: &[Vec<f32>]) -> Result<Person> {
        let mut person = self
            .get_person(person_id)?
            .ok_or_else(|| Error::NotFound(format!("person {person_id}")))?;

        let mut current = match person.face_vector.take() {
            Some(v) => v,
            None => mean_vector(samples)?,
        };
        let mut count = person.sample_count;

        for sample in samples {
            let sample = normalize(sample)?;
            if sample.len() != current.len() {
                return Err(Error::BadRequest(format!(
                    "sample dimension {} does not match stored dimension {}",
                    sample.len(),
                    current.len()
                )));
            }
            let n = count as f32;
            let blended: Vec<f32> = current
                .iter()
                .zip(sample.iter())
                .map(|(old, new)| (n * old + new) / (n + 1.0))
                .collect();
            current = normalize(&blended)?;
            count += 1;
        }

        self.conn().execute(
            "UPDATE people SET face_vector = ?1, sample_count = ?2, updated_at = ?3 WHERE id = ?4",
            params![vector_to_bytes(&current), count, now_timestamp(), person_id],
        )?;

        person.face_vector = Some(current);
        person.sample_count = count;
        Ok(person)
    }

    pub fn get_person(&self, person_id: i64) -> Result<Option<Person>> {
        let conn = self.conn();
        let person = conn
            .query_row(
                "SELECT id, name, face_vector, sample_count, active FROM people WHERE id = ?",
                [person_id],
                row_to_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn find_person_by_name(&self, name: &str) -> Result<Option<Person>> {
        let conn = self.conn();
        let person = conn
            .query_row(
                "SELECT id, name, face_vector, sample_count, active FROM people
                 WHERE LOWER(name) = LOWER(?)",
                [name],
                row_to_person,
            )
            .optional()?;
        Ok(person)
    }

    pub fn list_people(&self) -> Result<Vec<Person>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, face_vector, sample_count, active FROM people ORDER BY name",
        )?;
        let people = stmt
            .query_map([], row_to_person)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(people)
    }

    /// Delete a person; their faces keep existing with `person_id`
    /// set to NULL by the foreign key.
    pub fn delete_person(&self, person_id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM people WHERE id = ?", [person_id])?;
        Ok(deleted > 0)
    }

    /// Attach a face to a person and mark it verified (enrollment).
    pub fn assign_face(&self, face_id: i64, person_id: i64) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE faces SET person_id = ?1, verified = 1 WHERE id = ?2",
            params![person_id, face_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("face {face_id}")));
        }
        Ok(())
    }
}

fn row_to_face(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceRecord> {
    let bytes: Option<Vec<u8>> = row.get(7)?;
    Ok(FaceRecord {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        person_id: row.get(2)?,
        bbox: BoundingBox {
            x1: row.get(3)?,
            y1: row.get(4)?,
            x2: row.get(5)?,
            y2: row.get(6)?,
        },
        vector: bytes.map(|b| bytes_to_vector(&b)),
        confidence: row.get(8)?,
        verified: row.get::<_, i64>(9)? != 0,
    })
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let bytes: Option<Vec<u8>> = row.get(2)?;
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        face_vector: bytes.map(|b| bytes_to_vector(&b)),
        sample_count: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
    })
}

fn mean_vector(samples: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = normalize(&samples[0])?;
    let mut sum = first;
    for sample in &samples[1..] {
        let sample = normalize(sample)?;
        if sample.len() != sum.len() {
            return Err(Error::BadRequest(
                "sample vectors have mismatched dimensions".to_string(),
            ));
        }
        for (acc, v) in sum.iter_mut().zip(sample.iter()) {
            *acc += v;
        }
    }
    let n = samples.len() as f32;
    let mean: Vec<f32> = sum.iter().map(|v| v / n).collect();
    normalize(&mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::photos::sample_photo;

    fn unit_x() -> Vec<f32> {
        vec![1.0, 0.0, 0.0]
    }

    fn unit_y() -> Vec<f32> {
        vec![0.0, 1.0, 0.0]
    }

    #[test]
    fn test_put_face_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let photo_id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();

        let bbox = BoundingBox {
            x1: 10.0,
            y1: 20.0,
            x2: 110.0,
            y2: 140.0,
        };
        let face_id = db
            .put_face(photo_id, &bbox, Some(&unit_x()), Some(0.97))
            .unwrap();
        let face = db.get_face(face_id).unwrap().unwrap();
        assert_eq!(face.bbox, bbox);
        assert!(!face.verified);

        db.delete_photo(photo_id).unwrap();
        assert!(db.get_face(face_id).unwrap().is_none());
    }

    #[test]
    fn test_enrollment_conflict_leaves_vector_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_person("Alice", &[unit_x()]).unwrap();
        let before = db.get_person(id).unwrap().unwrap().face_vector;

        let err = db.create_person("Alice", &[unit_y()]).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // Case-insensitive uniqueness
        let err = db.create_person("alice", &[unit_y()]).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        assert_eq!(db.get_person(id).unwrap().unwrap().face_vector, before);
    }

    #[test]
    fn test_weighted_average_update() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_person("Bob", &[unit_x()]).unwrap();

        let person = db.add_person_samples(id, &[unit_y()]).unwrap();
        assert_eq!(person.sample_count, 2);

        // normalize((1*[1,0,0] + [0,1,0]) / 2) = [1,1,0]/sqrt(2)
        let vector = person.face_vector.unwrap();
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((vector[0] - expected).abs() < 1e-6);
        assert!((vector[1] - expected).abs() < 1e-6);
        assert!(vector[2].abs() < 1e-6);
    }

    #[test]
    fn test_delete_person_nulls_faces() {
        let db = Database::open_in_memory().unwrap();
        let photo_id = db.upsert_photo(&sample_photo("/photos/a.jpg")).unwrap();
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        };
        let face_id = db.put_face(photo_id, &bbox, Some(&unit_x()), None).unwrap();
        let person_id = db.create_person("Carol", &[unit_x()]).unwrap();
        db.assign_face(face_id, person_id).unwrap();

        db.delete_person(person_id).unwrap();
        let face = db.get_face(face_id).unwrap().unwrap();
        assert!(face.person_id.is_none());
    }
}
