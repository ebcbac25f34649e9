use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::{blocking, ApiResult, AppContext};
use crate::db::Database;
use crate::error::{Error, Result};

fn require_face_search(db: &Database) -> Result<()> {
    if !db.get_bool_setting("face_search_enabled", false)? {
        return Err(Error::Forbidden("face search is disabled".to_string()));
    }
    Ok(())
}

fn person_json(person: &crate::db::Person) -> serde_json::Value {
    serde_json::json!({
        "id": person.id,
        "name": person.name,
        "sample_count": person.sample_count,
        "active": person.active,
    })
}

/// Resolve enrollment face ids to their stored vectors. Faces without
/// embeddings cannot enroll anyone.
fn sample_vectors(db: &Database, face_ids: &[i64]) -> Result<Vec<Vec<f32>>> {
    if face_ids.is_empty() {
        return Err(Error::BadRequest(
            "at least one face id is required".to_string(),
        ));
    }
    let mut vectors = Vec::with_capacity(face_ids.len());
    for &face_id in face_ids {
        let face = db
            .get_face(face_id)?
            .ok_or_else(|| Error::NotFound(format!("face {face_id}")))?;
        let vector = face.vector.ok_or_else(|| {
            Error::BadRequest(format!("face {face_id} has no embedding vector"))
        })?;
        vectors.push(vector);
    }
    Ok(vectors)
}

pub async fn list(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let people = blocking(move || {
        require_face_search(&db)?;
        db.list_people()
    })
    .await?;
    Ok(Json(serde_json::json!({
        "people": people.iter().map(person_json).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub face_ids: Vec<i64>,
}

/// POST /people - enroll a person from detected faces. 201 on success,
/// 409 when the name already exists.
pub async fn create(
    State(ctx): State<AppContext>,
    Json(body): Json<CreateBody>,
) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let person = blocking(move || {
        require_face_search(&db)?;
        let vectors = sample_vectors(&db, &body.face_ids)?;
        let person_id = db.create_person(&body.name, &vectors)?;
        for &face_id in &body.face_ids {
            db.assign_face(face_id, person_id)?;
        }
        db.get_person(person_id)?
            .ok_or_else(|| Error::NotFound(format!("person {person_id}")))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(person_json(&person))))
}

pub async fn get_one(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let person = blocking(move || {
        require_face_search(&db)?;
        db.get_person(id)?
            .ok_or_else(|| Error::NotFound(format!("person {id}")))
    })
    .await?;
    Ok(Json(person_json(&person)))
}

#[derive(Deserialize)]
pub struct SamplesBody {
    pub face_ids: Vec<i64>,
}

/// POST /people/{id}/samples - fold more sample faces into the
/// person's averaged vector.
pub async fn add_samples(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Json(body): Json<SamplesBody>,
) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    let person = blocking(move || {
        require_face_search(&db)?;
        let vectors = sample_vectors(&db, &body.face_ids)?;
        let person = db.add_person_samples(id, &vectors)?;
        for &face_id in &body.face_ids {
            db.assign_face(face_id, id)?;
        }
        Ok(person)
    })
    .await?;
    Ok(Json(person_json(&person)))
}

pub async fn remove(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let db = ctx.db.clone();
    blocking(move || {
        require_face_search(&db)?;
        if !db.delete_person(id)? {
            return Err(Error::NotFound(format!("person {id}")));
        }
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
